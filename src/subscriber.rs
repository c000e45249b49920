//! Live threshold updates over Redis pub/sub (spec.md §4.D).
//!
//! Grounded in `subscribers.c`: three independent listeners, one per
//! channel, each parsing its payload and writing straight into the shared
//! [`Thresholds`]. The original spawns one pthread per channel and never
//! restarts a dead one; this keeps that behavior; spec.md §9 records the
//! no-restart posture as a deliberate open question rather than an oversight
//! to paper over.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tracing::{info, warn};

use crate::globals::Thresholds;
use crate::metrics;

#[derive(Error, Debug)]
pub enum SubscriberError {
    #[error("failed to connect to redis at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: redis::RedisError,
    },
}

/// Channel names the three listeners subscribe to (spec.md §6), configured
/// independently since the original treats them as separate config keys.
#[derive(Debug, Clone)]
pub struct ChannelNames {
    pub under_attack: String,
    pub t1_threshold: String,
    pub t2_threshold: String,
}

/// Spawns the three listener tasks. Each task owns its own connection and
/// exits silently (after logging) on a transport error; it is not restarted
/// by this function — restart policy, if any, is the caller's to add.
pub async fn spawn_all(
    redis_url: &str,
    channels: ChannelNames,
    thresholds: Arc<Thresholds>,
) -> Result<Vec<tokio::task::JoinHandle<()>>, SubscriberError> {
    let mut handles = Vec::with_capacity(3);

    handles.push(spawn_under_attack(redis_url, channels.under_attack, Arc::clone(&thresholds)).await?);
    handles.push(spawn_t1_threshold(redis_url, channels.t1_threshold, Arc::clone(&thresholds)).await?);
    handles.push(spawn_t2_threshold(redis_url, channels.t2_threshold, thresholds).await?);

    Ok(handles)
}

async fn connect_and_subscribe(
    redis_url: &str,
    channel: &str,
) -> Result<redis::aio::PubSub, SubscriberError> {
    let client = redis::Client::open(redis_url).map_err(|source| SubscriberError::Connect {
        url: redis_url.to_owned(),
        source,
    })?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|source| SubscriberError::Connect {
            url: redis_url.to_owned(),
            source,
        })?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|source| SubscriberError::Connect {
            url: redis_url.to_owned(),
            source,
        })?;
    Ok(pubsub)
}

async fn spawn_under_attack(
    redis_url: &str,
    channel: String,
    thresholds: Arc<Thresholds>,
) -> Result<tokio::task::JoinHandle<()>, SubscriberError> {
    let mut pubsub = connect_and_subscribe(redis_url, &channel).await?;
    Ok(tokio::spawn(async move {
        let mut stream = pubsub.on_message();
        info!(channel = %channel, "under-attack listener started");
        while let Some(msg) = stream.next().await {
            match msg.get_payload::<String>() {
                Ok(payload) => match payload.trim().parse::<i64>() {
                    Ok(value) => {
                        let flag = value != 0;
                        thresholds.set_under_attack(flag);
                        info!(flag, "under-attack flag updated");
                    }
                    Err(_) => warn!(payload, "malformed under-attack payload, ignoring"),
                },
                Err(err) => warn!(error = %err, "malformed under-attack payload, ignoring"),
            }
        }
        warn!(channel = %channel, "under-attack listener exiting: connection closed");
        metrics::inc_subscriber_disconnect("under_attack");
    }))
}

async fn spawn_t1_threshold(
    redis_url: &str,
    channel: String,
    thresholds: Arc<Thresholds>,
) -> Result<tokio::task::JoinHandle<()>, SubscriberError> {
    let mut pubsub = connect_and_subscribe(redis_url, &channel).await?;
    Ok(tokio::spawn(async move {
        let mut stream = pubsub.on_message();
        info!(channel = %channel, "t1 threshold listener started");
        while let Some(msg) = stream.next().await {
            match msg.get_payload::<String>() {
                Ok(payload) => match payload.trim().parse::<f64>() {
                    Ok(value) => {
                        thresholds.set_t1_threshold(value);
                        info!(value, "t1 threshold updated");
                    }
                    Err(_) => warn!(payload, "malformed t1 threshold payload, ignoring"),
                },
                Err(err) => warn!(error = %err, "malformed t1 threshold payload, ignoring"),
            }
        }
        warn!(channel = %channel, "t1 threshold listener exiting: connection closed");
        metrics::inc_subscriber_disconnect("t1_threshold");
    }))
}

async fn spawn_t2_threshold(
    redis_url: &str,
    channel: String,
    thresholds: Arc<Thresholds>,
) -> Result<tokio::task::JoinHandle<()>, SubscriberError> {
    let mut pubsub = connect_and_subscribe(redis_url, &channel).await?;
    Ok(tokio::spawn(async move {
        let mut stream = pubsub.on_message();
        info!(channel = %channel, "t2 threshold listener started");
        while let Some(msg) = stream.next().await {
            match msg.get_payload::<String>() {
                Ok(payload) => match payload.trim().parse::<f64>() {
                    Ok(value) => {
                        thresholds.set_t2_threshold(value);
                        info!(value, "t2 threshold updated");
                    }
                    Err(_) => warn!(payload, "malformed t2 threshold payload, ignoring"),
                },
                Err(err) => warn!(error = %err, "malformed t2 threshold payload, ignoring"),
            }
        }
        warn!(channel = %channel, "t2 threshold listener exiting: connection closed");
        metrics::inc_subscriber_disconnect("t2_threshold");
    }))
}
