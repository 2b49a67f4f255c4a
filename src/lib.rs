pub mod annotation;
pub mod assembler;
pub mod builder;
pub mod config;
pub mod domain;
pub mod error;
pub mod expression;
pub mod guard;
pub mod model;
pub mod movement;
pub mod output;
pub mod provider;
pub mod result;
pub mod status;
pub mod store;
