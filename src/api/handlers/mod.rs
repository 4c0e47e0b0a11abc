pub(crate) mod admin;
pub(crate) mod auth;
pub(crate) mod health;
pub(crate) mod lab;
pub(crate) mod me;
pub(crate) mod root;
