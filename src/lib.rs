pub mod cancel;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod hgvs;
pub mod http;
pub mod kgx;
pub mod model;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod reference;
pub mod scanner;
pub mod store;
pub mod variant_norm;
