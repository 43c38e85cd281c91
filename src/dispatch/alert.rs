use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

pub const ALERT_SUBJECT: &str = "Corridor Watch Alert";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Sms,
    Email,
}

impl AlertChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertChannel::Sms => "sms",
            AlertChannel::Email => "email",
        }
    }
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub channel: AlertChannel,
    pub address: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub enabled: bool,
    pub to: Vec<String>,
}

/// Alert recipients per channel. Disabled channels are never contacted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSettings {
    pub sms: ChannelSettings,
    pub email: ChannelSettings,
}

impl AlertSettings {
    pub fn validate(&self) -> CoreResult<()> {
        for (channel, settings) in self.channels() {
            if !settings.enabled {
                continue;
            }
            if settings.to.is_empty() {
                return Err(CoreError::config(format!(
                    "alerts.{} is enabled but has no recipients",
                    channel
                )));
            }
            if settings.to.iter().any(|a| a.trim().is_empty()) {
                return Err(CoreError::config(format!(
                    "alerts.{} contains an empty recipient",
                    channel
                )));
            }
        }
        Ok(())
    }

    /// Recipients of enabled channels, sms first.
    pub fn recipients(&self) -> Vec<Recipient> {
        self.channels()
            .into_iter()
            .filter(|(_, s)| s.enabled)
            .flat_map(|(channel, s)| {
                s.to.iter().map(move |address| Recipient {
                    channel,
                    address: address.clone(),
                })
            })
            .collect()
    }

    fn channels(&self) -> [(AlertChannel, &ChannelSettings); 2] {
        [(AlertChannel::Sms, &self.sms), (AlertChannel::Email, &self.email)]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Delivered,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub channel: AlertChannel,
    pub recipients: usize,
    pub state: DeliveryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Outbound alert collaborator.
///
/// Returns one status per channel contacted. `Err` means the notifier could
/// not attempt delivery at all.
pub trait Notifier {
    fn name(&self) -> &'static str;

    fn notify(
        &mut self,
        message: &str,
        recipients: &[Recipient],
        evidence: Option<&str>,
    ) -> Result<Vec<DeliveryStatus>>;
}

/// Writes each delivery to the log instead of contacting a gateway.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier {
    delivered: usize,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total individual deliveries logged so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(
        &mut self,
        message: &str,
        recipients: &[Recipient],
        evidence: Option<&str>,
    ) -> Result<Vec<DeliveryStatus>> {
        if message.trim().is_empty() {
            return Err(anyhow!("refusing to send an empty alert"));
        }
        if recipients.is_empty() {
            log::info!("alert: no recipients configured; skipping");
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for channel in [AlertChannel::Sms, AlertChannel::Email] {
            let targets: Vec<&Recipient> =
                recipients.iter().filter(|r| r.channel == channel).collect();
            if targets.is_empty() {
                continue;
            }
            for target in &targets {
                match (channel, evidence) {
                    (AlertChannel::Email, Some(evidence)) => log::info!(
                        "email to {}: {}: {} (evidence {})",
                        target.address,
                        ALERT_SUBJECT,
                        message,
                        evidence
                    ),
                    (AlertChannel::Email, None) => {
                        log::info!("email to {}: {}: {}", target.address, ALERT_SUBJECT, message)
                    }
                    (AlertChannel::Sms, _) => log::info!("sms to {}: {}", target.address, message),
                }
            }
            self.delivered += targets.len();
            out.push(DeliveryStatus {
                channel,
                recipients: targets.len(),
                state: DeliveryState::Delivered,
                detail: None,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AlertSettings {
        AlertSettings {
            sms: ChannelSettings {
                enabled: true,
                to: vec!["+15550100".to_string(), "+15550101".to_string()],
            },
            email: ChannelSettings {
                enabled: false,
                to: vec!["ops@example.com".to_string()],
            },
        }
    }

    #[test]
    fn only_enabled_channels_receive_alerts() {
        let recipients = settings().recipients();
        assert_eq!(recipients.len(), 2);
        assert!(recipients.iter().all(|r| r.channel == AlertChannel::Sms));

        let mut notifier = LogNotifier::new();
        let statuses = notifier.notify("structure near line", &recipients, None).unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].channel, AlertChannel::Sms);
        assert_eq!(statuses[0].recipients, 2);
        assert_eq!(notifier.delivered(), 2);
    }

    #[test]
    fn no_recipients_is_a_quiet_skip() {
        let mut notifier = LogNotifier::new();
        assert!(notifier.notify("hello", &[], None).unwrap().is_empty());
        assert!(notifier.notify("  ", &[], None).is_err());
    }

    #[test]
    fn enabled_channel_without_recipients_is_rejected() {
        let mut s = settings();
        s.email.enabled = true;
        s.email.to.clear();
        assert!(s.validate().is_err());
        assert!(settings().validate().is_ok());
        assert!(AlertSettings::default().validate().is_ok());
    }
}
