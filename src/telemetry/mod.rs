pub mod oltp;

use opentelemetry::global;
use opentelemetry::metrics::Meter;

/// Meter for all engine instruments. Resolves to a no-op meter unless
/// [`oltp::init_meter`] installed a provider.
pub fn get_meter() -> Meter {
    global::meter_provider().meter("ue-traffic")
}
