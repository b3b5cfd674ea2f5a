mod api;
mod blockchain;
mod config;
mod miner;
mod network;

use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use log::{error, info};
use tokio::net::TcpListener;
use tokio::runtime::Handle;

use api::AppState;
use blockchain::Blockchain;
use config::NodeConfig;
use miner::Miner;
use network::{NetworkManager, Peer};

#[actix_web::main]
async fn main() -> io::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let cfg = NodeConfig::from_env().map_err(io::Error::other)?;

    let chain = Arc::new(Blockchain::new(
        cfg.chain.difficulty_calculation_blocks,
        cfg.chain.target_block_time,
    ));

    let listener = TcpListener::bind((cfg.network.host.as_str(), cfg.network.port)).await?;
    let port = listener.local_addr()?.port();
    let me = Peer::local(cfg.network.host.clone(), port);
    info!("⛓️ Starting node {me}");

    let network = Arc::new(NetworkManager::new(
        me,
        Arc::clone(&chain),
        cfg.network.settings(),
    ));
    let server = tokio::spawn(Arc::clone(&network).serve(listener));

    match cfg.bootstrap {
        Some(bootstrap) => {
            info!("NODE - joining network through {bootstrap}");
            if let Err(err) = network.join_and_sync(bootstrap).await {
                error!("NODE - failed to join network: {err}");
                return Err(io::Error::other(err));
            }
            info!("NODE - synced {} blocks", chain.chain_length());
        }
        None => {
            let genesis = chain.create_genesis_block().map_err(io::Error::other)?;
            info!("NODE - new network, genesis {}", genesis.hash);
        }
    }

    let miner = Miner::new(Arc::clone(&network), cfg.miner, Handle::current());
    let stop = miner.stop_handle();
    let _miner = miner.spawn()?;

    let result = match cfg.api {
        Some(api) => {
            info!("NODE - status API at http://{}:{}", api.host, api.port);
            let state = web::Data::new(AppState::new(Arc::clone(&network)));
            HttpServer::new(move || {
                App::new()
                    .app_data(state.clone())
                    .configure(api::init_routes)
            })
            .bind((api.host.as_str(), api.port))?
            .run()
            .await
        }
        None => server.await.map_err(io::Error::other),
    };

    stop.store(true, Ordering::Relaxed);
    result
}
