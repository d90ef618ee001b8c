// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store-backed request service

use std::{
    future,
    sync::{Arc, RwLock},
};

use crate::{
    frame::{Exception, Request, Response},
    server::Service,
    store::{is_read_request, RegisterChanges, RegisterStore},
};

/// A [`Service`] that answers requests from a shared [`RegisterStore`].
///
/// Read requests take the shared lock, write requests the exclusive one.
/// The change journal is part of the store and therefore shares its lock.
#[derive(Debug, Clone)]
pub struct RegisterService {
    store: Arc<RwLock<RegisterStore>>,
}

impl RegisterService {
    #[must_use]
    pub fn new(store: RegisterStore) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
        }
    }

    /// Share an externally owned store.
    #[must_use]
    pub fn shared(store: Arc<RwLock<RegisterStore>>) -> Self {
        Self { store }
    }

    /// The shared store, e.g. for in-process telemetry or bridging.
    #[must_use]
    pub fn store(&self) -> Arc<RwLock<RegisterStore>> {
        Arc::clone(&self.store)
    }

    /// Return the writes applied by remote initiators since the last
    /// call and clear the journal.
    pub fn take_changes(&self) -> RegisterChanges {
        match self.store.write() {
            Ok(mut store) => store.take_changes(),
            Err(_) => RegisterChanges::default(),
        }
    }
}

impl Service for RegisterService {
    type Request = Request;
    type Response = Response;
    type Exception = Exception;
    type Future = future::Ready<Result<Response, Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let result = if is_read_request(&req) {
            self.store
                .read()
                .map_err(|_| Exception::ServerDeviceFailure)
                .and_then(|store| store.handle_read(&req))
        } else {
            self.store
                .write()
                .map_err(|_| Exception::ServerDeviceFailure)
                .and_then(|mut store| store.handle_write(&req))
        };
        if let Err(exception) = &result {
            log::debug!("Rejecting {req:?} with {exception:?}");
        }
        future::ready(result)
    }
}
