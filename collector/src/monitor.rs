use crate::state::CollectorState;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Reporter de stats: cada `interval` imprime un resumen de una copia puntual.
/// Sólo lee; corre mientras viva el collector.
pub async fn report_stats(state: CollectorState, interval: Duration) {
    loop {
        match stats_report(&state) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("no se pudo tomar snapshot de stats: {:?}", e),
        }

        tokio::time::sleep(interval).await;
    }
}

/// Una pasada del reporter, sin imprimir.
pub fn stats_report(state: &CollectorState) -> anyhow::Result<String> {
    let snapshot = state.snapshot()?;
    Ok(snapshot.summary_line())
}
