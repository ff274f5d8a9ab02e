use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, MemoryStorage, SqliteStorage};
use crate::clock::SystemClock;
use crate::config::{Config, StorageKind};
use crate::connectivity::HttpProbe;
use crate::event::{EventHandler, HostEvent, HostOutput};
use crate::net::HttpTransport;
use crate::worker::{Dependencies, Worker};

/// Main application state
pub struct App {
  origin: Url,
  worker: Arc<Worker>,
}

impl App {
  /// Build a relay backed by the real network and the configured storage.
  pub async fn new(config: Config) -> Result<Self> {
    let storage: Arc<dyn CacheStorage> = match config.cache.storage {
      StorageKind::Memory => Arc::new(MemoryStorage::new()),
      StorageKind::Sqlite => match &config.cache.path {
        Some(path) => Arc::new(SqliteStorage::open_at(path)?),
        None => Arc::new(SqliteStorage::open()?),
      },
    };

    let deps = Dependencies {
      transport: Arc::new(HttpTransport::new()?),
      probe: Arc::new(HttpProbe::new(config.probe_url()?, config.network_timeout())?),
      storage,
      clock: Arc::new(SystemClock),
      // The first poll corrects this if wrong
      initially_online: true,
    };

    Self::with_dependencies(config, deps)
  }

  /// Build a relay from injected collaborators. Tests use this with scripted
  /// transports and in-memory storage.
  pub fn with_dependencies(config: Config, deps: Dependencies) -> Result<Self> {
    let origin = config.origin_url()?;
    let worker = Arc::new(Worker::new(&config, deps)?);
    Ok(Self { origin, worker })
  }

  /// Serve the host over stdin/stdout.
  pub async fn run(self) -> Result<()> {
    self.run_with(EventHandler::stdin(), tokio::io::stdout()).await
  }

  /// Drive host events until input closes, then wait for in-flight work.
  pub async fn run_with<W>(self, mut events: EventHandler, writer: W) -> Result<()>
  where
    W: AsyncWrite + Unpin + Send + 'static,
  {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_outputs(out_rx, writer));

    let notify_tx = out_tx.clone();
    let subscription = self.worker.notifications().subscribe(move |notification| {
      let _ = notify_tx.send(HostOutput::Notification {
        notification: notification.clone(),
      });
    });

    let report = self.worker.start().await;
    info!(
      origin = %self.origin,
      precached = report.cached.len(),
      "relay started"
    );

    let mut tasks = JoinSet::new();
    while let Some(event) = events.next().await {
      let worker = Arc::clone(&self.worker);
      let out = out_tx.clone();
      let origin = self.origin.clone();

      // One task per event so a slow fetch never blocks the channel
      tasks.spawn(async move {
        if let Some(output) = dispatch(&worker, &origin, event).await {
          let _ = out.send(output);
        }
      });

      // Reap finished tasks as we go
      while tasks.try_join_next().is_some() {}
    }

    debug!(in_flight = tasks.len(), "host input closed, finishing");
    while tasks.join_next().await.is_some() {}

    self.worker.stop();
    self.worker.notifications().unsubscribe(subscription);
    drop(out_tx);

    writer_task
      .await
      .map_err(|e| eyre!("Output writer panicked: {}", e))?
  }
}

async fn dispatch(worker: &Worker, origin: &Url, event: HostEvent) -> Option<HostOutput> {
  match event {
    HostEvent::Fetch { id, request } => {
      let result = match request.into_descriptor(origin) {
        Ok(request) => worker.handle_fetch(&request).await,
        Err(e) => Err(e),
      };
      Some(match result {
        Ok(served) => HostOutput::response(id, served),
        Err(e) => HostOutput::Error {
          id,
          message: e.to_string(),
        },
      })
    }
    HostEvent::Control { id, message } => worker
      .handle_control(&message)
      .await
      .map(|reply| HostOutput::Reply { id, reply }),
    HostEvent::Connectivity { online } => {
      worker.signal_connectivity(online).await;
      None
    }
    HostEvent::Sync { tag } => {
      worker.handle_sync(&tag).await;
      None
    }
  }
}

async fn write_outputs<W>(mut rx: mpsc::UnboundedReceiver<HostOutput>, mut writer: W) -> Result<()>
where
  W: AsyncWrite + Unpin,
{
  while let Some(output) = rx.recv().await {
    let mut line = match serde_json::to_vec(&output) {
      Ok(line) => line,
      Err(e) => {
        warn!(error = %e, "failed to serialize output");
        continue;
      }
    };
    line.push(b'\n');

    writer
      .write_all(&line)
      .await
      .map_err(|e| eyre!("Failed to write output: {}", e))?;
    writer
      .flush()
      .await
      .map_err(|e| eyre!("Failed to flush output: {}", e))?;
  }
  Ok(())
}
