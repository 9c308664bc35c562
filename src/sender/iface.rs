use std::path::Path;

use serde::{Deserialize, Serialize};

/// UE simulator whose tunnel interfaces the units send through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimulatorType {
    /// Send through the default route, no interface binding.
    #[default]
    None,
    Ueransim,
    Packetrusher,
}

impl SimulatorType {
    /// Tunnel interface created for unit `id`, if this simulator creates one.
    pub fn interface_name(&self, id: u64) -> Option<String> {
        match self {
            SimulatorType::None => None,
            SimulatorType::Ueransim => Some(format!("uesimtun{id}")),
            SimulatorType::Packetrusher => Some(format!("val{id:010}")),
        }
    }
}

pub fn interface_exists(name: &str) -> bool {
    Path::new("/sys/class/net").join(name).exists()
}
