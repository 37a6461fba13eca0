//! Per-model pedal layout.

/// What a pedal model offers: how many pedals, where their protocol indices
/// start, and what they are called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub pedal_count: usize,
    /// Added to a user-facing pedal index to get the protocol index.
    pub first_pedal_index: usize,
    pub pedal_names: &'static [&'static str],
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            pedal_count: 1,
            first_pedal_index: 0,
            pedal_names: &[],
        }
    }
}

struct ModelEntry {
    model: &'static str,
    capabilities: Capabilities,
}

static MODELS: &[ModelEntry] = &[
    ModelEntry {
        model: "FS2020U1IR",
        capabilities: Capabilities {
            pedal_count: 3,
            first_pedal_index: 0,
            pedal_names: &["left", "middle", "right"],
        },
    },
    ModelEntry {
        model: "FS2017U2IR",
        capabilities: Capabilities {
            pedal_count: 2,
            first_pedal_index: 0,
            pedal_names: &["left", "right"],
        },
    },
    ModelEntry {
        model: "FS2007U1IR",
        capabilities: Capabilities {
            pedal_count: 1,
            first_pedal_index: 1,
            pedal_names: &[],
        },
    },
];

impl Capabilities {
    /// Capabilities for a model string, falling back to a single pedal for
    /// models we do not know.
    pub fn lookup(model: &str) -> Self {
        MODELS
            .iter()
            .find(|entry| entry.model == model)
            .map(|entry| entry.capabilities)
            .unwrap_or_default()
    }

    pub fn is_known_model(model: &str) -> bool {
        MODELS.iter().any(|entry| entry.model == model)
    }

    pub fn pedal_name(&self, index: usize) -> Option<&'static str> {
        self.pedal_names.get(index).copied()
    }

    /// Resolve a pedal by name, case-insensitively.
    pub fn find_pedal(&self, name: &str) -> Option<usize> {
        self.pedal_names
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name))
    }

    /// Display label: the pedal's name when it has one, otherwise its
    /// 1-based number.
    pub fn pedal_label(&self, index: usize) -> String {
        match self.pedal_name(index) {
            Some(name) => name.to_string(),
            None => (index + 1).to_string(),
        }
    }

    pub fn protocol_index(&self, index: usize) -> usize {
        index + self.first_pedal_index
    }
}
