pub use eerieview_core::*;
