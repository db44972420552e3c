use crate::gateway::Gateway;
use crate::proxy::handler::handle_request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub struct ProxyServer {
    addr: SocketAddr,
    gateway: Arc<Gateway>,
    semaphore: Arc<Semaphore>,
    max_connections: usize,
    /// Background pre-cache batches started by message signals.
    tasks: TaskTracker,
}

impl ProxyServer {
    pub fn new(addr: SocketAddr, gateway: Arc<Gateway>, max_connections: usize) -> Self {
        Self {
            addr,
            gateway,
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            tasks: TaskTracker::new(),
        }
    }

    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Accepts connections until `shutdown` resolves, then waits for pending
    /// pre-cache batches.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> io::Result<()> {
        info!(
            addr = %listener.local_addr()?,
            origin = %self.gateway.origin(),
            max_connections = self.max_connections,
            "media cache gateway listening"
        );

        tokio::pin!(shutdown);
        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            let gateway = self.gateway.clone();
            let tasks = self.tasks.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let service = service_fn(move |req: Request<Incoming>| {
                    handle_request(req, gateway.clone(), tasks.clone())
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(%peer, error = %e, "connection closed with error");
                }
            });
        }

        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(pending = self.tasks.len(), "waiting for pre-cache tasks");
        }
        self.tasks.wait().await;
        info!("media cache gateway stopped");
        Ok(())
    }
}
