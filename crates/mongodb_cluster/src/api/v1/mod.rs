pub mod mongodb;

pub use mongodb::{MongoDB, MongoDBSpec, MongoDBStatus, MongoDBUser, Phase};
