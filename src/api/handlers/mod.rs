pub mod controller;

pub use controller::AppState;
