//! Route handlers grouped by area

pub mod live;
pub mod overlay;
pub mod session;
pub mod view;
