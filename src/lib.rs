pub mod io_struct;
pub mod relay_state;
pub mod secrets;
pub mod server;
pub mod session;
pub mod translator;
pub mod upstream;
