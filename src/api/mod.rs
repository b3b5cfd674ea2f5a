mod chain;
mod health;
pub mod models;
mod peers;
mod stats;

use actix_web::web::{self, ServiceConfig};

pub use models::AppState;

/// Read-only status routes. `/chain/latest/` is registered before
/// `/chain/{index}/` so it is not parsed as an index.
pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(health::health_check)
            .service(chain::get_chain)
            .service(chain::get_latest_block)
            .service(chain::get_block)
            .service(chain::validate_chain)
            .service(stats::get_stats)
            .service(peers::get_peers),
    );
}
