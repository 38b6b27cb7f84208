pub mod inference_service;
pub mod trained_model;
