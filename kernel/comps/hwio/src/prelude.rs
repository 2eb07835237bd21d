// SPDX-License-Identifier: MPL-2.0

#![expect(unused_imports)]

pub(crate) use alloc::{
    boxed::Box,
    collections::VecDeque,
    string::{String, ToString},
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
pub(crate) use core::fmt::Debug;

pub(crate) use bitflags::bitflags;
pub(crate) use int_to_c_enum::TryFromInt;
pub(crate) use log::{debug, error, info, trace, warn};
pub(crate) use spin::{Mutex, MutexGuard, Once};

pub(crate) use crate::{
    error::{Errno, Error},
    platform::{Context, PAGE_SIZE, Paddr, Vaddr},
};
pub(crate) type Result<T> = core::result::Result<T, Error>;
pub(crate) use crate::{return_errno, return_errno_with_message};
