//! Result formatting: numbers and units, row shapes, HTML rendering.

pub mod html;
pub mod number;
pub mod render;
pub mod reply;
pub mod shape;

pub use html::sanitize_html;
pub use number::{format_number, metric_label, unit_for_column, Unit};
pub use render::{build_html_from_rows, Renderer, NO_DATA_MESSAGE};
pub use reply::{title_from_user, AgentResult, ReplyBuilder};
pub use shape::{detect_shape, RowProfile, Shape};
