pub mod store_actor;
