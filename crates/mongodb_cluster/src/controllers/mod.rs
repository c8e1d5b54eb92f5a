pub mod annotations;
pub mod replica_set;
pub mod replica_set_controller;
pub mod tls;
pub mod upgrade;
