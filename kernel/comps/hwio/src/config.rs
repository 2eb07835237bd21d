// SPDX-License-Identifier: MPL-2.0

//! Module arguments of the broker.
//!
//! The arguments are taken from a command line string that follows the
//! Linux kernel command line rules, where arguments of this module are
//! prefixed with `hwio.`:
//!
//! ```text
//! hwio.variant=mmio hwio.log_level=debug hwio.name="hwio0"
//! ```
//!
//! <https://www.kernel.org/doc/html/v6.4/admin-guide/kernel-parameters.html>

use log::LevelFilter;

use crate::prelude::*;

/// The module name that prefixes the arguments of the broker.
pub const MODULE_NAME: &str = "hwio";

/// The deployable flavors of the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    /// The generalized broker that hands out memory ranges and interrupt lines.
    #[default]
    Hwio,
    /// The memory-only broker.
    Mmio,
}

impl Variant {
    /// Returns whether sessions may bind interrupt lines.
    pub fn serves_irq(&self) -> bool {
        matches!(self, Variant::Hwio)
    }

    /// Returns the default name of the device node.
    pub fn default_device_name(&self) -> &'static str {
        match self {
            Variant::Hwio => "hwio",
            Variant::Mmio => "mmio",
        }
    }
}

/// A module argument.
#[derive(PartialEq, Debug, Clone)]
enum ModuleArg<'a> {
    /// A flag argument
    Arg(&'a str),
    /// A key-value argument
    KeyVal(&'a str, &'a str),
}

/// The configuration of the broker, fixed at module initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwioConfig {
    variant: Variant,
    log_level: LevelFilter,
    device_name: Option<String>,
}

impl Default for HwioConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            log_level: LevelFilter::Info,
            device_name: None,
        }
    }
}

impl HwioConfig {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            ..Self::default()
        }
    }

    /// Parses the configuration from a kernel command line.
    ///
    /// Arguments of other modules are ignored.
    /// Malformed and unknown arguments of this module are skipped with a warning.
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut config = Self::default();
        for arg in module_args(cmdline, MODULE_NAME) {
            config.apply(arg);
        }
        config
    }

    fn apply(&mut self, arg: ModuleArg<'_>) {
        let ModuleArg::KeyVal(name, value) = arg else {
            warn!("[hwio] unknown module argument {:?}, skip for now", arg);
            return;
        };
        match name {
            "variant" => match value {
                "hwio" => self.variant = Variant::Hwio,
                "mmio" => self.variant = Variant::Mmio,
                _ => warn!("[hwio] unknown variant {}, skip for now", value),
            },
            "log_level" => self.log_level = parse_log_level(value),
            "name" if !value.is_empty() => self.device_name = Some(value.to_string()),
            _ => warn!("[hwio] unable to apply argument {}={}, skip for now", name, value),
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    /// Returns the name of the device node.
    ///
    /// Unless set explicitly, the name is derived from the variant.
    pub fn device_name(&self) -> &str {
        self.device_name
            .as_deref()
            .unwrap_or(self.variant.default_device_name())
    }
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        // Otherwise, OFF
        _ => LevelFilter::Off,
    }
}

// Splits the command line string by spaces but preserve
// ones that are protected by double quotes(`"`).
fn split_arg(input: &str) -> impl Iterator<Item = &str> {
    let mut inside_quotes = false;

    input.split(move |c: char| {
        if c == '"' {
            inside_quotes = !inside_quotes;
        }

        !inside_quotes && c.is_whitespace()
    })
}

/// Yields the arguments of `module` in `cmdline`, in order.
fn module_args<'a>(cmdline: &'a str, module: &'a str) -> impl Iterator<Item = ModuleArg<'a>> {
    split_arg(cmdline)
        // Everything after the "--" mark belongs to the init process.
        .take_while(|arg| *arg != "--")
        .filter(|arg| !arg.is_empty())
        .filter_map(move |arg| {
            // Arg => Entry | Entry "=" Value
            let (entry, value) = match arg.split_once('=') {
                Some((entry, value)) => (entry, Some(value.trim_matches('"'))),
                None => (arg, None),
            };
            // Entry => Module "." ModuleOptionName
            let (modname, option) = entry.split_once('.')?;
            if modname != module {
                return None;
            }
            if option.is_empty() || option.contains('.') {
                warn!("[hwio] unable to parse argument {}, skip for now", arg);
                return None;
            }
            Some(match value {
                Some(value) => ModuleArg::KeyVal(option, value),
                None => ModuleArg::Arg(option),
            })
        })
}
