pub mod discovery;
pub mod health;
pub mod modules;
pub mod oauth;
pub mod organizations;
pub mod sources;
pub mod vcs;
