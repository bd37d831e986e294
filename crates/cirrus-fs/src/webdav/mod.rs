//! WebDAV protocol adapter.
//!
//! The generic engine (`dav-server`) decodes requests into typed calls and
//! encodes typed results back into the wire format; this module wires its
//! `DavFileSystem` and `DavLockSystem` traits to [`Resource`] orchestrators
//! and the durable lock store, and hosts the hyper server loop. With the
//! lock system wired, the engine advertises compliance class 2 and handles
//! `Lock-Token`/`Timeout` header syntax itself.
//!
//! [`Resource`]: crate::resource::Resource

mod filesystem;
mod locksys;
mod server;

pub use filesystem::CirrusDavFs;
pub use locksys::StoreLockSystem;
pub use server::{serve, serve_background, CirrusWebDavServer};

use dav_server::davpath::DavPath;

/// Internal path form of a request path.
pub(crate) fn dav_to_path(path: &DavPath) -> String {
    let raw = path.as_rel_ospath().to_string_lossy().to_string();
    format!("/{}", raw.trim_start_matches('/'))
}
