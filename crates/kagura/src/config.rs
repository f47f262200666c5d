//! Configuration for building a [`Descrambler`].

use std::time::Duration;

use kagura_card::{AcasCard, SmartCardPort};
use kagura_cas::{Descrambler, DEFAULT_KEY_SWITCH_TIMEOUT};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// No smart-card backend was supplied; the descrambler cannot resolve
    /// ECMs without one.
    #[error("no smart-card backend configured")]
    MissingCard,
}

/// Builder wiring the master key, the smart-card backend and the AES
/// backend choice into a ready-to-run [`Descrambler`].
///
/// # Example
///
/// ```
/// use kagura::DescramblerConfig;
/// use kagura_card::testing::FakeCard;
///
/// let master_key = [0xAA; 32];
/// let descrambler = DescramblerConfig::new(master_key)
///     .with_card(FakeCard::new(master_key))
///     .with_portable_aes(true)
///     .build()
///     .unwrap();
/// # drop(descrambler);
/// ```
pub struct DescramblerConfig {
    master_key: [u8; 32],
    card: Option<Box<dyn SmartCardPort>>,
    force_portable_aes: bool,
    key_switch_timeout: Duration,
}

impl DescramblerConfig {
    /// Start from the 32-byte master secret the Kcl derivation mixes in.
    #[must_use]
    pub fn new(master_key: [u8; 32]) -> Self {
        Self {
            master_key,
            card: None,
            force_portable_aes: false,
            key_switch_timeout: DEFAULT_KEY_SWITCH_TIMEOUT,
        }
    }

    /// Select the smart-card backend. Any [`SmartCardPort`] implementation
    /// works: a PC/SC bridge in production, a recorded-trace replay or
    /// [`FakeCard`](kagura_card::testing::FakeCard) in tests.
    #[must_use]
    pub fn with_card(self, port: impl SmartCardPort + 'static) -> Self {
        self.with_boxed_card(Box::new(port))
    }

    /// Like [`with_card`](Self::with_card) for an already-boxed backend.
    #[must_use]
    pub fn with_boxed_card(mut self, port: Box<dyn SmartCardPort>) -> Self {
        self.card = Some(port);
        self
    }

    /// Force the portable AES backend regardless of hardware capability.
    #[must_use]
    pub fn with_portable_aes(mut self, force: bool) -> Self {
        self.force_portable_aes = force;
        self
    }

    /// Bound the parity-flip wait for the ECM worker.
    #[must_use]
    pub fn with_key_switch_timeout(mut self, timeout: Duration) -> Self {
        self.key_switch_timeout = timeout;
        self
    }

    /// Build the descrambler and start its ECM worker.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingCard`] when no backend was configured.
    pub fn build(self) -> Result<Descrambler, ConfigError> {
        let port = self.card.ok_or(ConfigError::MissingCard)?;
        let card = AcasCard::new(port, self.master_key);
        Ok(Descrambler::new(card)
            .with_portable_aes(self.force_portable_aes)
            .with_key_switch_timeout(self.key_switch_timeout))
    }
}

#[cfg(test)]
mod tests {
    use kagura_card::testing::FakeCard;

    use super::*;

    #[test]
    fn build_without_card_fails() {
        let err = DescramblerConfig::new([0u8; 32]).build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingCard));
    }

    #[test]
    fn build_with_card_starts_the_worker() {
        let master_key = [0xAA; 32];
        let descrambler = DescramblerConfig::new(master_key)
            .with_card(FakeCard::new(master_key))
            .build()
            .unwrap();
        drop(descrambler);
    }

    #[test]
    fn options_are_forwarded() {
        let master_key = [0x01; 32];
        let descrambler = DescramblerConfig::new(master_key)
            .with_card(FakeCard::new(master_key))
            .with_portable_aes(true)
            .with_key_switch_timeout(Duration::from_millis(250))
            .build();
        assert!(descrambler.is_ok());
    }
}
