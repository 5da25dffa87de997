//! HTTP API handlers for kitaba-ui

pub mod buildinfo;
pub mod detection;
pub mod health;
pub mod history;
pub mod session;
pub mod sse;
pub mod state;
pub mod ui;

pub use buildinfo::get_build_info;
pub use detection::{detect, upload_image, MAX_UPLOAD_BYTES};
pub use health::health_routes;
pub use history::{delete_record, save_correction, set_draft, toggle_edit};
pub use session::{sign_in, sign_out};
pub use sse::event_stream;
pub use state::get_state;
pub use ui::serve_index;
