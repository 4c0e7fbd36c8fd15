//! Entry point: wires the chain `BlockSource` into a `BlockProcessor` loop
//! that drives the `Watcher`, `MultiResponder` and `TransactionTracker` in
//! lockstep against a single shared `BlockCache`.

use std::sync::Arc;

use clap::Parser;
use ethers::providers::{Http, Provider};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pisa_engine::appointment::AppointmentStore;
use pisa_engine::chain::block_cache::BlockCache;
use pisa_engine::chain::block_processor::BlockProcessor;
use pisa_engine::chain::rpc::{BlockSource, EthersBlockSource};
use pisa_engine::responder::signer::{EthersGasEstimator, EthersSigner, Signer};
use pisa_engine::responder::{MultiResponder, TransactionTracker};
use pisa_engine::settings::{CommandLineOptions, Settings};
use pisa_engine::watcher::Watcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::new(CommandLineOptions::parse())?;
    info!("starting up");

    let provider = Arc::new(Provider::<Http>::try_from(settings.rpc.http_endpoint.as_str())?);
    let block_source = EthersBlockSource::new(&settings.rpc.http_endpoint)?;

    let signer = EthersSigner::new(
        &settings.signer.private_key_file,
        provider.clone(),
        settings.rpc.expected_chain_id,
    )?;
    let gas_estimator = EthersGasEstimator::new(provider.clone(), signer.address());
    info!(address = ?signer.address(), "loaded signing key");

    let tracker = Arc::new(TransactionTracker::new());
    let responder = Arc::new(MultiResponder::new(
        signer,
        gas_estimator,
        tracker.clone(),
        settings.replacement_rate_pct,
        settings.max_queue_depth,
        ethers::types::U256::from(settings.response_gas_limit),
    ));

    let store = Arc::new(AppointmentStore::new());
    let watcher = Watcher::new(
        store,
        responder.clone(),
        settings.confirmations_before_response,
        settings.confirmations_before_removal,
    )?;

    run(settings, block_source, watcher, responder, tracker).await
}

/// The cooperative, single-threaded event loop: one new-head event at a time
/// is walked through `Watcher`, `MultiResponder` and `TransactionTracker` in
/// turn, against the same `BlockCache` snapshot, before the next is fetched.
async fn run<S, G>(
    settings: Settings,
    block_source: EthersBlockSource,
    watcher: Watcher<Arc<MultiResponder<S, G>>>,
    responder: Arc<MultiResponder<S, G>>,
    tracker: Arc<TransactionTracker>,
) -> anyhow::Result<()>
where
    S: Signer + 'static,
    G: pisa_engine::responder::signer::GasEstimator + 'static,
{
    let mut cache = BlockCache::new(settings.block_cache_depth as u64);
    let mut processor = BlockProcessor::new(settings.block_cache_depth as u64);
    let poll_interval = pisa_engine::constants::BLOCK_POLL_INTERVAL;

    loop {
        match block_source.head_hash().await {
            Ok(head) => match processor.process_head(&block_source, &mut cache, head).await {
                Ok(Some(event)) => {
                    watcher.on_new_head(&cache, event).await;
                    responder.on_new_head(&cache, event).await;
                    tracker.on_new_head(&cache, event.new_head).await;
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "failed to process new head"),
            },
            Err(e) => error!(error = %e, "failed to fetch chain head, retrying"),
        }
        tokio::time::sleep(poll_interval).await;
    }
}
