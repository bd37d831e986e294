//! WebDAV server loop using hyper.
//!
//! Hosts one [`Volume`] behind a `DavHandler`, allowing desktop file
//! managers to mount it over loopback HTTP.

use super::{CirrusDavFs, StoreLockSystem};
use crate::volume::Volume;
use dav_server::DavHandler;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Handle to a WebDAV server running in the background.
pub struct CirrusWebDavServer {
    /// Server address.
    addr: SocketAddr,
    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl CirrusWebDavServer {
    /// Get the server's listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the URL to mount this server.
    pub fn mount_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Shutdown the server.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn build_handler(volume: &Arc<Volume>) -> DavHandler {
    DavHandler::builder()
        .filesystem(Box::new(CirrusDavFs::new(volume.clone())))
        .locksystem(StoreLockSystem::new(volume.locks().clone(), volume.config()))
        .principal(volume.config().principal.clone())
        .build_handler()
}

/// Start a WebDAV server for the volume and block until shutdown.
///
/// # Example
///
/// ```ignore
/// use cirrus_fs::webdav::serve;
/// use cirrus_fs::{MountConfig, Volume};
/// use cirrus_remote::MemoryRemote;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> std::io::Result<()> {
///     let remote = Arc::new(MemoryRemote::new());
///     let volume = Volume::open(remote, MountConfig::default()).await.unwrap();
///
///     // This blocks until Ctrl+C
///     serve(volume, 4918).await
/// }
/// ```
pub async fn serve(volume: Arc<Volume>, port: u16) -> io::Result<()> {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let dav_server = build_handler(&volume);

    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    info!("WebDAV server listening on http://{}", local_addr);
    info!("");
    info!("To mount in Finder:");
    info!("  1. Open Finder");
    info!("  2. Press Cmd+K (Go -> Connect to Server)");
    info!("  3. Enter: http://{}", local_addr);
    info!("  4. Click Connect");
    info!("");
    info!("Press Ctrl+C to stop the server");

    loop {
        let (stream, remote_addr) = listener.accept().await?;
        debug!("Connection from {}", remote_addr);

        let dav_server = dav_server.clone();
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(
                    io,
                    service_fn(move |req| {
                        let dav_server = dav_server.clone();
                        async move { Ok::<_, Infallible>(dav_server.handle(req).await) }
                    }),
                )
                .await
            {
                error!("Connection error: {:?}", err);
            }
        });
    }
}

/// Start a WebDAV server in the background.
///
/// Returns a handle that can be used to get the server address and shut it
/// down.
pub async fn serve_background(volume: Arc<Volume>, port: u16) -> io::Result<CirrusWebDavServer> {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let dav_server = build_handler(&volume);

    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    info!("WebDAV server started on http://{}", local_addr);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            debug!("Connection from {}", remote_addr);
                            let dav_server = dav_server.clone();
                            let io = TokioIo::new(stream);

                            tokio::spawn(async move {
                                if let Err(err) = http1::Builder::new()
                                    .serve_connection(
                                        io,
                                        service_fn(move |req| {
                                            let dav_server = dav_server.clone();
                                            async move {
                                                Ok::<_, Infallible>(dav_server.handle(req).await)
                                            }
                                        }),
                                    )
                                    .await
                                {
                                    error!("Connection error: {:?}", err);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {:?}", e);
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("WebDAV server shutting down");
                    break;
                }
            }
        }
    });

    Ok(CirrusWebDavServer {
        addr: local_addr,
        shutdown_tx: Some(shutdown_tx),
    })
}
