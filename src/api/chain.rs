use actix_web::{HttpResponse, Responder, get, web};

use super::models::{AppState, ChainResponse, ErrorResponse, ValidateResponse};
use crate::blockchain::ChainError;

/// Get the full blockchain.
#[get("/chain/")]
pub async fn get_chain(state: web::Data<AppState>) -> impl Responder {
    let chain = state.chain.blocks();
    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        next_difficulty: chain.last().map(|b| b.next_block_difficulty),
        chain,
    })
}

/// Get the current head.
#[get("/chain/latest/")]
pub async fn get_latest_block(state: web::Data<AppState>) -> impl Responder {
    match state.chain.get_latest_block() {
        Ok(block) => HttpResponse::Ok().json(block),
        Err(err) => HttpResponse::ServiceUnavailable().json(ErrorResponse {
            error: err.to_string(),
        }),
    }
}

#[get("/chain/{index}/")]
pub async fn get_block(state: web::Data<AppState>, path: web::Path<u64>) -> impl Responder {
    match state.chain.get_block(path.into_inner()) {
        Ok(block) => HttpResponse::Ok().json(block),
        Err(err @ ChainError::IndexOutOfRange { .. }) => HttpResponse::NotFound().json(ErrorResponse {
            error: err.to_string(),
        }),
        Err(err) => HttpResponse::InternalServerError().json(ErrorResponse {
            error: err.to_string(),
        }),
    }
}

/// Validate the whole chain.
#[get("/validate/")]
pub async fn validate_chain(state: web::Data<AppState>) -> impl Responder {
    let result = state.chain.is_valid();
    HttpResponse::Ok().json(ValidateResponse {
        valid: result.is_ok(),
        length: state.chain.chain_length(),
        error: result.err().map(|e| e.to_string()),
    })
}
