//! Autoscaler library for compute pipelines
//!
//! This crate provides the core functionality for:
//! - Metrics collection from host, accelerator and workload probes
//! - Time-series storage, resampling and feature engineering
//! - Demand prediction and prediction accuracy tracking
//! - Scaling decisions, cloud execution with rollback
//! - The scaling manager that drives the monitoring loop
//! - Health checks and observability

pub mod accuracy;
pub mod collector;
pub mod config;
pub mod decision;
pub mod error;
pub mod executor;
pub mod health;
pub mod journal;
pub mod manager;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod stats;
pub mod timeseries;

pub use accuracy::AccuracyTracker;
pub use collector::MetricsCollector;
pub use config::{ConfigUpdate, ScalingConfig};
pub use decision::DecisionEngine;
pub use error::{ConfigError, ProviderError, Result, ScalingError};
pub use executor::{CloudExecutor, CloudProvider, SimulatedCloud};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use manager::{DetailedMetrics, ManagerStatus, ScalingEvent, ScalingManager};
pub use models::*;
pub use observability::{ScalerMetrics, StructuredLogger};
pub use predictor::DemandPredictor;
pub use timeseries::TimeSeriesStore;
