// SPDX-License-Identifier: MPL-2.0

//! The companion module loaded next to the broker on Genode hosts.
//!
//! It owns no resources; loading and unloading it only leaves a trace in the log.

use crate::prelude::*;

const GENODE_MODULE_NAME: &str = "genode";

/// The loaded companion module. Unloaded when dropped.
#[derive(Debug)]
pub struct GenodeModule {
    _private: (),
}

impl GenodeModule {
    pub fn init() -> Self {
        info!("{} module registered", GENODE_MODULE_NAME);
        Self { _private: () }
    }

    pub fn exit(self) {
        drop(self);
    }
}

impl Drop for GenodeModule {
    fn drop(&mut self) {
        info!("{} module unregistered", GENODE_MODULE_NAME);
    }
}
