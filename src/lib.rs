pub mod config;
pub mod elastic_net;
pub mod frame;
pub mod grid_search;
pub mod knn;
pub mod loaders;
pub mod merge;
pub mod preprocess;
pub mod results;
pub mod teams;
pub mod win_model;
