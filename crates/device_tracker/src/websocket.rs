mod handler;
mod registry;
mod viewer;

pub use handler::{router, run_http_server, serve_viewer, ViewerState, VIEWER_LABEL};
pub use registry::{BroadcastReport, ConnectionRegistry, ViewerId, ViewerSink};
pub use viewer::WebSocketViewer;
