pub mod connection;
pub mod dead_letter_repository;
pub mod delivery_repository;
pub mod models;
pub mod subscription_repository;

pub use connection::{establish_connection, run_migrations, DatabasePool};
pub use dead_letter_repository::DeadLetterRepository;
pub use delivery_repository::DeliveryRepository;
pub use subscription_repository::SubscriptionRepository;
