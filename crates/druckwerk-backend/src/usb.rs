// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// USB transport shim.
//
// Direct USB printing needs platform printing services that this build does
// not link. The backend still registers so `usb://` queues resolve, lists
// any seeded devices, and reports submission as unsupported.

use std::path::Path;

use async_trait::async_trait;

use druckwerk_core::types::{Device, DeviceClass, Document, Job, Printer};

use crate::{Backend, BackendError, BackendResult, seeded_devices};

pub struct UsbBackend;

impl UsbBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UsbBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for UsbBackend {
    fn name(&self) -> &'static str {
        "usb"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["usb"]
    }

    async fn list_devices(&self) -> BackendResult<Vec<Device>> {
        Ok(seeded_devices("CUPS_USB_DEVICES", DeviceClass::Direct))
    }

    async fn submit_job(
        &self,
        printer: &Printer,
        _job: &Job,
        _doc: &Document,
        _file_path: &Path,
    ) -> BackendResult<()> {
        Err(BackendError::unsupported(
            "submit",
            &printer.uri,
            "USB transport is not available on this platform",
        ))
    }
}
