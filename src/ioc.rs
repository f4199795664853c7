use crate::email::Eml;
use std::collections::BTreeSet;

/// Indicators of compromise derived from a parsed email.
///
/// Sets are ordered so that detectors see a deterministic input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Iocs {
    pub urls: BTreeSet<String>,
    pub domains: BTreeSet<String>,
    pub ip_addresses: BTreeSet<String>,
    pub emails: BTreeSet<String>,
    pub sha256s: BTreeSet<String>,
}

impl Iocs {
    pub fn from_eml(eml: &Eml) -> Self {
        let mut iocs = Iocs::default();

        if let Some(received_ips) = &eml.header.received_ip {
            iocs.ip_addresses.extend(received_ips.iter().cloned());
        }

        for body in &eml.bodies {
            iocs.urls.extend(body.urls.iter().cloned());
            iocs.domains.extend(body.domains.iter().cloned());
            iocs.ip_addresses.extend(body.ip_addresses.iter().cloned());
            iocs.emails.extend(body.emails.iter().cloned());
        }

        iocs.sha256s.extend(
            eml.attachments
                .iter()
                .map(|attachment| attachment.hash.sha256.clone()),
        );

        iocs
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
            && self.domains.is_empty()
            && self.ip_addresses.is_empty()
            && self.emails.is_empty()
            && self.sha256s.is_empty()
    }
}
