// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use cloudfront_shipper::{
    config::Config,
    deletion::DeletionGate,
    metrics::{GraphiteSink, LogSink, MetricsSink},
    pipeline::Pipeline,
    rate_limit::TokioClock,
    shipper::Shipper,
    source::{build_object_store, ObjectStoreSource},
};

#[tokio::main]
pub async fn main() {
    let config = Config::from_env();
    let log_level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    let store = match build_object_store(&config.source) {
        Ok(store) => store,
        Err(e) => {
            error!("Error opening log source: {e}");
            process::exit(1);
        }
    };

    let shipper = match Shipper::new(config.shipper_config(), TokioClock::default()) {
        Ok(shipper) => shipper,
        Err(e) => {
            error!("Error creating Loki shipper: {e}");
            process::exit(1);
        }
    };

    let mut pipeline = Pipeline::new(
        Arc::new(ObjectStoreSource::new(store)),
        shipper,
        DeletionGate::new(config.mode),
        config.list_filter(chrono::Utc::now().date_naive()),
        config.max_lines,
        config.max_chunk_lines,
    );

    let metrics = match pipeline.run().await {
        Ok(metrics) => metrics,
        Err(e) => {
            error!("Shipping run failed: {e}");
            process::exit(1);
        }
    };

    let summary = metrics.to_map();
    if let Err(e) = LogSink.send(&summary).await {
        error!("Error logging metrics: {e}");
    }
    if let Some(graphite) = &config.graphite {
        let sink = GraphiteSink::new(graphite.host.clone(), graphite.port, graphite.prefix.clone());
        if let Err(e) = sink.send(&summary).await {
            error!("Error sending metrics: {e}");
        }
    }

    info!("Shipping run complete");
}
