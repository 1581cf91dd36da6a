use std::collections::VecDeque;
use std::sync::Arc;

use provenance_capture::capture::{text_source, CaptureConfig, CaptureRequest, CaptureService};
use provenance_capture::domain::{CheckoutOutcome, FeatureKey, Stage, SubscriptionTier};
use provenance_capture::geolocation::{
    AcquirerConfig, FixedLocationProvider, GeolocationAcquirer, UnsupportedLocationProvider,
};
use provenance_capture::infra::sqlite::{open_file, open_pool};
use provenance_capture::infra::{
    os_shutdown_signal, HttpFraudClient, HttpRemoteStore, LocationProvider, RetryPolicy,
    ShutdownCoordinator, SqliteProductSnapshots, SqliteQueue, SqliteSettings,
};
use provenance_capture::integrity::{integrity_score, portfolio_summary};
use provenance_capture::store::{PlanStore, ProductStore};
use provenance_capture::sync::{ConnectivitySignal, SyncCoordinator, SyncWorker, SyncWorkerConfig};
use provenance_capture::telemetry::{init_telemetry, TelemetryConfig};

fn print_help() {
    eprintln!(
        "\
provenance-admin

USAGE:
  provenance-admin <command> [options]

COMMANDS:
  migrate                         Apply local (or --server) migrations
  queue-status                    Pending items per endpoint and dead letters
  queue-list                      Print pending items as NDJSON
  capture                         Record one log (queued when offline)
  sync                            Drain the offline queue to the remote store
  dead-letters                    Print dead-lettered items as NDJSON
  requeue-dead-letters            Move dead-lettered items back to the queue
  score-products                  Integrity scores and portfolio summary
  plan                            Subscription tier, product limit and features

COMMON OPTIONS:
  --db-path <path>                (defaults to env PROVENANCE_DB_PATH, then provenance-local.db)

migrate OPTIONS:
  --server                        Migrate a server database instead
  --database-url <sqlite_url>     (with --server; defaults to env DATABASE_URL)

queue-list OPTIONS:
  --limit <n>                     (optional) Print at most n items

capture OPTIONS:
  --stage <stage>                 Intake | Creation | Finishing | Serialization
  --text <text>                   Log description
  --product <id>                  (optional) Existing product; a new one is created otherwise
  --photo <ref>                   (optional) Photo reference
  --lat <lat> --lng <lng>         (optional) Fixed position; the fallback location is used otherwise
  --remote-url <url>              (defaults to env REMOTE_BASE_URL)
  --offline                       Queue every write instead of delivering

sync OPTIONS:
  --remote-url <url>              (defaults to env REMOTE_BASE_URL)
  --fraud-url <url>               (optional; defaults to env FRAUD_ENDPOINT_URL)
  --user-id <id>                  (optional; defaults to env ARTISAN_USER_ID)
  --watch                         Keep running and drain on every trigger until Ctrl+C

plan OPTIONS:
  --checkout <tier>               (optional) Apply a completed checkout: FREE | PRO | ENTERPRISE
  --checkout-failed <reason>      (optional) Record a failed checkout; the tier is kept
"
    );
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn resolve_db_path(db_path: Option<String>) -> String {
    db_path
        .or_else(|| std::env::var("PROVENANCE_DB_PATH").ok())
        .unwrap_or_else(|| "provenance-local.db".to_string())
}

fn resolve_remote_url(remote_url: Option<String>) -> anyhow::Result<String> {
    remote_url
        .or_else(|| std::env::var("REMOTE_BASE_URL").ok())
        .ok_or_else(|| anyhow::anyhow!("missing --remote-url (or env REMOTE_BASE_URL)"))
}

async fn open_queue(db_path: Option<String>) -> anyhow::Result<SqliteQueue> {
    let path = resolve_db_path(db_path);
    let pool = open_file(&path).await?;
    let queue = SqliteQueue::new(pool);
    queue.initialize().await?;
    Ok(queue)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    match command.as_str() {
        "migrate" => {
            let mut db_path: Option<String> = None;
            let mut database_url: Option<String> = None;
            let mut server = false;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--db-path" => db_path = Some(take_value(&mut args, "--db-path")?),
                    "--database-url" => {
                        database_url = Some(take_value(&mut args, "--database-url")?)
                    }
                    "--server" => server = true,
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            if server {
                let database_url = database_url
                    .or_else(|| std::env::var("DATABASE_URL").ok())
                    .ok_or_else(|| {
                        anyhow::anyhow!("missing --database-url (or env DATABASE_URL)")
                    })?;
                let pool = open_pool(&database_url, 1).await?;
                provenance_capture::migrations::run_server(&pool).await?;
            } else {
                open_queue(db_path).await?;
            }
            println!("ok: migrations applied");
            Ok(())
        }
        "queue-status" => {
            let mut db_path: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--db-path" => db_path = Some(take_value(&mut args, "--db-path")?),
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let queue = open_queue(db_path).await?;
            let by_endpoint = queue.count_by_endpoint().await?;
            let dead_letters = queue.list_dead_letters().await?;

            let mut counts = serde_json::Map::new();
            for (endpoint, count) in by_endpoint {
                counts.insert(endpoint.to_string(), serde_json::json!(count));
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "pending": queue.count().await?,
                    "by_endpoint": counts,
                    "dead_letters": dead_letters.len(),
                }))?
            );
            Ok(())
        }
        "queue-list" => {
            let mut db_path: Option<String> = None;
            let mut limit: Option<usize> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--db-path" => db_path = Some(take_value(&mut args, "--db-path")?),
                    "--limit" => limit = Some(take_value(&mut args, "--limit")?.parse()?),
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let queue = open_queue(db_path).await?;
            let items = queue.drain_all().await?;
            let limit = limit.unwrap_or(items.len());
            for item in items.iter().take(limit) {
                println!("{}", serde_json::to_string(item)?);
            }
            Ok(())
        }
        "capture" => {
            let mut db_path: Option<String> = None;
            let mut remote_url: Option<String> = None;
            let mut product_id: Option<String> = None;
            let mut stage: Option<Stage> = None;
            let mut text: Option<String> = None;
            let mut photo: Option<String> = None;
            let mut lat: Option<f64> = None;
            let mut lng: Option<f64> = None;
            let mut offline = false;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--db-path" => db_path = Some(take_value(&mut args, "--db-path")?),
                    "--remote-url" => remote_url = Some(take_value(&mut args, "--remote-url")?),
                    "--product" => product_id = Some(take_value(&mut args, "--product")?),
                    "--stage" => {
                        let raw = take_value(&mut args, "--stage")?;
                        stage = Some(raw.parse().map_err(|e: String| anyhow::anyhow!(e))?);
                    }
                    "--text" => text = Some(take_value(&mut args, "--text")?),
                    "--photo" => photo = Some(take_value(&mut args, "--photo")?),
                    "--lat" => lat = Some(take_value(&mut args, "--lat")?.parse()?),
                    "--lng" => lng = Some(take_value(&mut args, "--lng")?.parse()?),
                    "--offline" => offline = true,
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            init_telemetry(&TelemetryConfig::from_env_with_service("provenance-admin"))
                .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {e}"))?;

            let stage = stage.ok_or_else(|| anyhow::anyhow!("missing --stage"))?;
            let text = text.unwrap_or_default();
            let remote_url = match resolve_remote_url(remote_url) {
                Ok(url) => url,
                // never contacted while offline
                Err(_) if offline => "http://localhost:8080".to_string(),
                Err(e) => return Err(e),
            };

            let provider: Arc<dyn LocationProvider> = match (lat, lng) {
                (Some(lat), Some(lng)) => Arc::new(FixedLocationProvider::new(lat, lng, None)),
                (None, None) => Arc::new(UnsupportedLocationProvider),
                _ => anyhow::bail!("--lat and --lng must be given together"),
            };

            let queue = open_queue(db_path).await?;
            let snapshots = SqliteProductSnapshots::new(queue.pool().clone());
            let products = Arc::new(ProductStore::with_snapshots(snapshots).await?);
            let plan = Arc::new(PlanStore::load(SqliteSettings::new(queue.pool().clone())).await?);
            let config = CaptureConfig::from_env();

            let service = CaptureService::new(
                queue,
                Arc::new(HttpRemoteStore::new(remote_url)?),
                ConnectivitySignal::new(!offline),
                products,
                plan,
                GeolocationAcquirer::new(provider, AcquirerConfig::from_env()),
                text_source(config.text_source, None)?,
                config,
            );

            let product_id = match product_id {
                Some(id) => id,
                None => service.create_product().await?.value.id,
            };

            let mut request = CaptureRequest::new(product_id, stage, text);
            if let Some(photo) = photo {
                request = request.with_photo(photo);
            }
            let outcome = service.capture(request).await?;

            if let Some(warning) = &outcome.storage_warning {
                eprintln!("warning: {warning}");
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        "sync" => {
            let mut db_path: Option<String> = None;
            let mut remote_url: Option<String> = None;
            let mut fraud_url: Option<String> = None;
            let mut user_id: Option<String> = None;
            let mut watch = false;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--db-path" => db_path = Some(take_value(&mut args, "--db-path")?),
                    "--remote-url" => remote_url = Some(take_value(&mut args, "--remote-url")?),
                    "--fraud-url" => fraud_url = Some(take_value(&mut args, "--fraud-url")?),
                    "--user-id" => user_id = Some(take_value(&mut args, "--user-id")?),
                    "--watch" => watch = true,
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            init_telemetry(&TelemetryConfig::from_env_with_service("provenance-admin"))
                .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {e}"))?;

            let remote_url = resolve_remote_url(remote_url)?;
            let fraud_url = fraud_url.or_else(|| std::env::var("FRAUD_ENDPOINT_URL").ok());
            let user_id = user_id.or_else(|| std::env::var("ARTISAN_USER_ID").ok());

            let queue = open_queue(db_path).await?;
            let snapshots = SqliteProductSnapshots::new(queue.pool().clone());
            let products = Arc::new(ProductStore::with_snapshots(snapshots).await?);
            let remote = Arc::new(HttpRemoteStore::new(remote_url)?);

            let mut coordinator =
                SyncCoordinator::new(queue, remote, products, RetryPolicy::from_env());
            if let Some(url) = fraud_url {
                coordinator =
                    coordinator.with_evaluator(Arc::new(HttpFraudClient::new(url)?), user_id);
            }

            let shutdown = ShutdownCoordinator::new();

            if watch {
                let coordinator = Arc::new(coordinator);
                let worker = SyncWorker::new(
                    coordinator.clone(),
                    ConnectivitySignal::new(true),
                    SyncWorkerConfig::from_env(),
                );
                let handle = tokio::spawn(worker.run(shutdown.signal()));
                os_shutdown_signal().await;
                shutdown.shutdown();
                handle.await?;
                println!("{}", serde_json::to_string_pretty(&coordinator.status())?);
                return Ok(());
            }

            let signal = shutdown.signal();
            let report = tokio::select! {
                report = coordinator.run_sync_until(&signal, |p| eprintln!("progress: {p}%")) => report?,
                _ = os_shutdown_signal() => {
                    shutdown.shutdown();
                    anyhow::bail!("interrupted");
                }
            };

            if !report.is_complete() {
                eprintln!("warning: {} items still pending", report.total - report.delivered);
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        "dead-letters" => {
            let mut db_path: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--db-path" => db_path = Some(take_value(&mut args, "--db-path")?),
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let queue = open_queue(db_path).await?;
            for dead in queue.list_dead_letters().await? {
                println!(
                    "{}",
                    serde_json::to_string(&serde_json::json!({
                        "item": dead.item,
                        "dead_lettered_at": dead.dead_lettered_at,
                    }))?
                );
            }
            Ok(())
        }
        "requeue-dead-letters" => {
            let mut db_path: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--db-path" => db_path = Some(take_value(&mut args, "--db-path")?),
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let queue = open_queue(db_path).await?;
            let requeued = queue.requeue_dead_letters().await?;
            println!("ok: requeued {requeued} items");
            Ok(())
        }
        "score-products" => {
            let mut db_path: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--db-path" => db_path = Some(take_value(&mut args, "--db-path")?),
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let queue = open_queue(db_path).await?;
            let snapshots = SqliteProductSnapshots::new(queue.pool().clone());
            let products = snapshots.load_all().await?;

            for product in &products {
                println!("{}", serde_json::to_string(&integrity_score(product))?);
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&portfolio_summary(&products))?
            );
            Ok(())
        }
        "plan" => {
            let mut db_path: Option<String> = None;
            let mut checkout: Option<CheckoutOutcome> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--db-path" => db_path = Some(take_value(&mut args, "--db-path")?),
                    "--checkout" => {
                        let raw = take_value(&mut args, "--checkout")?;
                        let tier: SubscriptionTier =
                            raw.parse().map_err(|e: String| anyhow::anyhow!(e))?;
                        checkout = Some(CheckoutOutcome::Completed { tier });
                    }
                    "--checkout-failed" => {
                        let reason = take_value(&mut args, "--checkout-failed")?;
                        checkout = Some(CheckoutOutcome::Failed { reason });
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let queue = open_queue(db_path).await?;
            let plan = PlanStore::load(SqliteSettings::new(queue.pool().clone())).await?;
            if let Some(outcome) = checkout {
                let tier = plan.apply_checkout(outcome).await?;
                eprintln!("tier in effect: {tier}");
            }

            let mut features = serde_json::Map::new();
            for feature in FeatureKey::ALL {
                features.insert(
                    feature.as_str().to_string(),
                    serde_json::json!(plan.has_feature(feature)),
                );
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "tier": plan.tier(),
                    "product_limit": plan.limits().product_limit,
                    "features": features,
                }))?
            );
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
