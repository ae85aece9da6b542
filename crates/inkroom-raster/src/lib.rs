//! Inkroom Raster Library
//!
//! CPU rasterization for the Inkroom drawing surface: brush stamping,
//! flood fill, dual-layer compositing, and PNG export.

pub mod brush;
pub mod export;
pub mod fill;
pub mod layers;
pub mod pixmap;

pub use brush::{render_stroke, smooth_polyline, stamp_disc};
pub use export::{encode_png, write_png, ExportError};
pub use fill::{flood_fill, FillCache, FillPatch, FILL_TOLERANCE};
pub use layers::{background_rgba, CursorShape, FrameLoop, SceneLayers};
pub use pixmap::{needs_resize, Pixmap, Rgba};
