use clap::Parser;
use log::{error, info};
use server::auth::ExactMatchVerifier;
use server::registry::ClientRegistry;
use server::router::Router;
use server::server::{Server, ShutdownHandle};
use server::storage::{MemoryStorage, Storage};
use shared::pad_credential;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Main-method of the application.
/// Parses command-line arguments, composes the storage, registry, router
/// and supervisor, then serves until shutdown (admin command or Ctrl+C).
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Idle timeout before silent connections are evicted, in seconds
        #[clap(long, default_value = "900")]
        idle_timeout_secs: u64,
    }

    env_logger::init();
    let args = Args::parse();

    // Composition root: each of these exists exactly once per process and
    // is passed by reference to its collaborators.
    let registry = Arc::new(ClientRegistry::new());
    let storage = Arc::new(MemoryStorage::new());
    storage.add_admin(
        pad_credential(b"admin").expect("admin username fits"),
        pad_credential(b"pass").expect("admin password fits"),
    );

    let handle = ShutdownHandle::new();
    let router = Arc::new(Router::new(
        Arc::clone(&registry),
        Arc::clone(&storage) as Arc<dyn Storage>,
        Box::new(ExactMatchVerifier),
        handle.clone(),
    ));

    let server = Arc::new(Server::new(
        router,
        handle.clone(),
        Duration::from_secs(args.idle_timeout_secs),
    ));

    let address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&address).await?;

    let mut serve_handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };

    tokio::select! {
        result = &mut serve_handle => {
            match result {
                Ok(Ok(())) => info!("server exited"),
                Ok(Err(e)) => error!("server failed: {}", e),
                Err(e) => error!("server task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
            let _ = serve_handle.await;
        }
    }

    Ok(())
}
