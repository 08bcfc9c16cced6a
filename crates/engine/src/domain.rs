//! Hostname conversion to ASCII-compatible encoding.

use tracing::warn;

/// Converts a hostname to its ASCII-compatible (IDN) form before
/// connecting. Conversion failures fall back to the input, mirroring the
/// lenient behavior servers-with-odd-names depend on.
#[must_use]
pub fn convert_domain_name(host: &str) -> String {
    if host.is_ascii() {
        return host.to_owned();
    }
    match idna::domain_to_ascii(host) {
        Ok(ascii) => ascii,
        Err(error) => {
            warn!(%error, host, "could not convert domain name");
            host.to_owned()
        }
    }
}
