//! Envelope layers carried in backup file names.
//!
//! A backup file may be wrapped in any number of signature and encryption
//! layers, each recorded as a name suffix. Layers are read right to left:
//! `x.tar.gpg.sig` is a detached-signature layer around an encrypted layer
//! around the plain `x.tar`.

/// One signature or encryption wrapper, identified by its name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeLayer {
    /// Binary OpenPGP signature (`.sig`)
    DetachedSignature,
    /// ASCII-armored OpenPGP signature (`.asc`)
    ArmoredSignature,
    /// OpenPGP encrypted payload (`.gpg`)
    Encrypted,
}

impl EnvelopeLayer {
    pub const ALL: [EnvelopeLayer; 3] = [
        EnvelopeLayer::DetachedSignature,
        EnvelopeLayer::ArmoredSignature,
        EnvelopeLayer::Encrypted,
    ];

    pub const fn suffix(self) -> &'static str {
        match self {
            EnvelopeLayer::DetachedSignature => ".sig",
            EnvelopeLayer::ArmoredSignature => ".asc",
            EnvelopeLayer::Encrypted => ".gpg",
        }
    }

    pub const fn is_signature(self) -> bool {
        matches!(
            self,
            EnvelopeLayer::DetachedSignature | EnvelopeLayer::ArmoredSignature
        )
    }
}

/// Split the outermost layer off `name`.
///
/// Returns `None` when the name carries no recognized suffix, or when the
/// suffix is the whole name (a file literally called `.gpg` has nothing to
/// strip down to).
pub fn strip_layer(name: &str) -> Option<(EnvelopeLayer, &str)> {
    EnvelopeLayer::ALL.into_iter().find_map(|layer| {
        name.strip_suffix(layer.suffix())
            .filter(|rest| !rest.is_empty())
            .map(|rest| (layer, rest))
    })
}

/// All layers of `name`, outermost first.
pub fn layers(name: &str) -> Vec<EnvelopeLayer> {
    let mut out = Vec::new();
    let mut current = name;
    while let Some((layer, rest)) = strip_layer(current) {
        out.push(layer);
        current = rest;
    }
    out
}

/// `name` with every recognized layer removed.
pub fn plain_name(name: &str) -> &str {
    let mut current = name;
    while let Some((_, rest)) = strip_layer(current) {
        current = rest;
    }
    current
}
