mod app;
mod hub;
mod state;

pub use app::create_app;
pub use hub::HubServer;
pub use state::AppState;
