//! `siproute`: exercise the preparser, the resolver and the fork scheduler
//! from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use sip_core::{Headers, Method, Request, RequestLine, SipUri};
use sip_dns::{Resolver, SipResolver};
use sip_observe::{set_core_metrics, TracingCoreMetrics};
use sip_parse::{FrameError, StreamFramer};
use sip_proxy::{make_response, ForkAction, ForkBehavior, ForkConfig, ForkEvent, ForkSession, Target};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a SIP or SIPS URI to transport tuples (RFC 3263)
    Resolve {
        uri: String,
        /// Skip NAPTR and go straight to SRV
        #[arg(long)]
        no_naptr: bool,
    },
    /// Frame a captured stream through the preparser
    Preparse {
        file: PathBuf,
        /// Feed the file in chunks of this many bytes
        #[arg(long, default_value_t = 1024)]
        chunk: usize,
    },
    /// Show how targets are grouped and which final response wins
    Fork {
        /// Request-URI of the proxied request
        uri: String,
        /// Target URI; a `q` parameter sets its q-value
        #[arg(long = "target", required = true)]
        targets: Vec<String>,
        /// Status code every branch answers with, in target order
        #[arg(long = "answer", default_value = "486")]
        answers: Vec<u16>,
        /// Method of the proxied request
        #[arg(long, default_value = "INVITE")]
        method: String,
        /// JSON fork configuration; the q-value flags below override it
        #[arg(long)]
        fork_config: Option<PathBuf>,
        /// FULL_SEQUENTIAL, EQUAL_Q_PARALLEL or FULL_PARALLEL
        #[arg(long)]
        q_value_behavior: Option<ForkBehavior>,
        /// Cancel a fork group when the next one starts
        #[arg(long)]
        q_value_cancel_btw_fork_groups: Option<bool>,
        /// Wait for a group to terminate before starting the next
        #[arg(long)]
        q_value_wait_for_terminate: Option<bool>,
        #[arg(long)]
        q_value_ms_between_fork_groups: Option<u64>,
        #[arg(long)]
        q_value_ms_before_cancel: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    set_core_metrics(Arc::new(TracingCoreMetrics));

    match Args::parse().command {
        Command::Resolve { uri, no_naptr } => resolve(&uri, no_naptr).await,
        Command::Preparse { file, chunk } => preparse(&file, chunk).await,
        Command::Fork {
            uri,
            targets,
            answers,
            method,
            fork_config,
            q_value_behavior,
            q_value_cancel_btw_fork_groups,
            q_value_wait_for_terminate,
            q_value_ms_between_fork_groups,
            q_value_ms_before_cancel,
        } => {
            let mut config = match fork_config {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str::<ForkConfig>(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => ForkConfig::default(),
            };
            if let Some(behavior) = q_value_behavior {
                config.behavior = behavior;
            }
            if let Some(cancel) = q_value_cancel_btw_fork_groups {
                config.cancel_between_fork_groups = cancel;
            }
            if let Some(wait) = q_value_wait_for_terminate {
                config.wait_for_terminate = wait;
            }
            if let Some(ms) = q_value_ms_between_fork_groups {
                config.ms_between_fork_groups = ms;
            }
            if let Some(ms) = q_value_ms_before_cancel {
                config.ms_before_cancel = ms;
            }
            fork(&uri, &method, &targets, &answers, config)
        }
    }
}

async fn resolve(uri: &str, no_naptr: bool) -> Result<()> {
    let uri = SipUri::parse(uri).ok_or_else(|| anyhow!("invalid SIP URI: {}", uri))?;
    let mut resolver = SipResolver::from_system();
    if no_naptr {
        resolver = resolver.disable_naptr();
    }
    let tuples = resolver.resolve(&uri).await?;
    for (i, tuple) in tuples.iter().enumerate() {
        println!("{:>2}  {}", i + 1, tuple);
    }
    Ok(())
}

async fn preparse(file: &Path, chunk: usize) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let mut framer = StreamFramer::new();
    let mut count = 0usize;

    for piece in data.chunks(chunk.max(1)) {
        framer.push(piece);
        loop {
            match framer.next_message() {
                Ok(Some(frame)) => {
                    count += 1;
                    println!("#{} {}", count, frame.start_line);
                    for header in frame.headers.iter() {
                        println!("    {}: {}", header.name, header.value);
                    }
                    if !frame.body.is_empty() {
                        println!("    ({} body bytes)", frame.body.len());
                    }
                }
                Ok(None) => break,
                Err(FrameError::Malformed) => {
                    warn!(offset = count, "malformed message, stopping");
                    return Err(anyhow!("malformed message after {} complete messages", count));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    info!(messages = count, leftover = framer.buffered(), "preparse finished");
    Ok(())
}

fn fork(uri: &str, method: &str, targets: &[String], answers: &[u16], config: ForkConfig) -> Result<()> {
    let uri = SipUri::parse(uri).ok_or_else(|| anyhow!("invalid SIP URI: {}", uri))?;
    let method = Method::from_token(method);
    let mut headers = Headers::new();
    headers.push("Via", "SIP/2.0/UDP siproute.invalid;branch=z9hG4bKsiproute");
    headers.push("Max-Forwards", "70");
    headers.push("From", "<sip:siproute@siproute.invalid>;tag=siproute");
    headers.push("To", format!("<{}>", uri));
    headers.push("Call-ID", "siproute-fork");
    headers.push("CSeq", format!("1 {}", method));
    let request = Request::new(RequestLine::new(method, uri), headers, Bytes::new())?;

    let mut batch = Vec::with_capacity(targets.len());
    for raw in targets {
        let uri = SipUri::parse(raw).ok_or_else(|| anyhow!("invalid target URI: {}", raw))?;
        batch.push(Target::new(uri));
    }
    let answer_for = |tid: &str| -> u16 {
        batch
            .iter()
            .position(|t| t.tid() == tid)
            .and_then(|i| answers.get(i).or(answers.last()))
            .copied()
            .unwrap_or(486)
    };

    println!("behavior: {}", config.behavior.as_str());
    let mut session = ForkSession::new(request, Arc::new(config));
    session.add_targets(batch.clone());

    let mut actions = session.start();
    let mut group = 0;
    while !actions.is_empty() {
        let mut responses = Vec::new();
        let mut starts = Vec::new();
        for action in actions {
            match action {
                ForkAction::Start { tid, request } => {
                    starts.push(format!("{} ({})", request.uri(), tid));
                    let code = answer_for(&tid);
                    responses.push(ForkEvent::Response {
                        tid,
                        response: make_response(&request, code)?,
                    });
                }
                ForkAction::Forward(response) => println!("forward {} {}", response.code(), response.reason()),
                ForkAction::Cancel { tid } => println!("cancel {}", tid),
                ForkAction::RespondToCancel(_) => {}
                ForkAction::Schedule { event, after } => println!("schedule {:?} after {:?}", event, after),
            }
        }
        if !starts.is_empty() {
            group += 1;
            println!("group {}: {}", group, starts.join(", "));
        }
        actions = responses.into_iter().flat_map(|event| session.handle(event)).collect();
    }
    if !session.is_finished() {
        println!("fork still waiting on timers");
    }
    Ok(())
}
