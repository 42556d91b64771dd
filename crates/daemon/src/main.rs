//! `taskmesh` -- local task-distribution network.
//!
//! Runs a control plane and a pool of worker nodes in one process against
//! an in-process ledger. Every non-empty line read on stdin becomes a task;
//! each collected result is printed to stdout as one JSON line.
//!
//! # Environment variables
//!
//! | Variable                      | Required | Default                     |
//! |-------------------------------|----------|-----------------------------|
//! | `NODE_COUNT`                  | no       | `1`                         |
//! | `BROKER_URL`                  | no       | `memory://`                 |
//! | `BROKER_CONNECT_ATTEMPTS`     | no       | `5`                         |
//! | `BROKER_RETRY_DELAY_SECS`     | no       | `5`                         |
//! | `BROKER_RECONNECT_DELAY_SECS` | no       | `5`                         |
//! | `NODE_NAME`                   | no       | `AI_Node`                   |
//! | `NODE_ID`                     | no       | `node_` + address prefix    |
//! | `INFERENCE_FAILURE_POLICY`    | no       | `submit-error`              |
//! | `OPENAI_API_KEY`              | yes      | --                          |
//! | `OPENAI_BASE_URL`             | no       | `https://api.openai.com/v1` |
//! | `OPENAI_MODEL`                | no       | `gpt-4o`                    |

use std::sync::Arc;

use taskmesh_daemon::{Devnet, DevnetConfig};
use taskmesh_node::{OpenAiConfig, OpenAiInference};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "taskmesh=info,taskmesh_daemon=info,taskmesh_control=info,\
                 taskmesh_node=info,taskmesh_broker=info,taskmesh_ledger=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = DevnetConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });
    let openai = OpenAiConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid inference configuration");
        std::process::exit(1);
    });

    tracing::info!(
        node_count = config.node_count,
        model = %openai.model,
        "Starting taskmesh",
    );

    let devnet = match Devnet::start(&config, Arc::new(OpenAiInference::new(openai))).await {
        Ok(devnet) => devnet,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start");
            std::process::exit(1);
        }
    };

    let mut results = devnet.results();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let question = line.trim();
                    if !question.is_empty() {
                        devnet.submit(question);
                    }
                }
                Ok(None) => {
                    tracing::info!("Input closed; waiting for outstanding results");
                    stdin_open = false;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read input");
                    stdin_open = false;
                }
            },
            result = results.recv() => match result {
                Ok(result) => match serde_json::to_string(&result) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::error!(error = %e, "Failed to encode result"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Result output lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C");
                break;
            }
        }
    }

    devnet.shutdown().await;
}
