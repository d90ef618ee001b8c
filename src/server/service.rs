// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{future::Future, io, sync::Arc};

/// A Modbus server service.
///
/// A service answers one decoded request with either a response or the
/// Modbus exception that rejects it. The surrounding server loop turns
/// an `Err` into an exception frame that reuses the request's function
/// code.
pub trait Service {
    /// Requests handled by the service.
    type Request;

    /// Responses given by the service.
    type Response;

    /// Modbus exceptions raised by the service.
    type Exception;

    /// The future response value.
    type Future: Future<Output = Result<Self::Response, Self::Exception>> + Send;

    /// Process the request and return the response asynchronously.
    fn call(&self, req: Self::Request) -> Self::Future;
}

/// Creates new [`Service`] values, e.g. one per accepted connection.
pub trait NewService {
    /// Requests handled by the service.
    type Request;

    /// Responses given by the service.
    type Response;

    /// Modbus exceptions raised by the service.
    type Exception;

    /// The `Service` value created by this factory.
    type Instance: Service<
        Request = Self::Request,
        Response = Self::Response,
        Exception = Self::Exception,
    >;

    /// Create and return a new service value.
    fn new_service(&self) -> io::Result<Self::Instance>;
}

impl<F, R> NewService for F
where
    F: Fn() -> io::Result<R>,
    R: Service,
{
    type Request = R::Request;
    type Response = R::Response;
    type Exception = R::Exception;
    type Instance = R;

    fn new_service(&self) -> io::Result<R> {
        (*self)()
    }
}

impl<S: NewService + ?Sized> NewService for Arc<S> {
    type Request = S::Request;
    type Response = S::Response;
    type Exception = S::Exception;
    type Instance = S::Instance;

    fn new_service(&self) -> io::Result<S::Instance> {
        (**self).new_service()
    }
}

impl<S: Service + ?Sized + 'static> Service for Box<S> {
    type Request = S::Request;
    type Response = S::Response;
    type Exception = S::Exception;
    type Future = S::Future;

    fn call(&self, request: S::Request) -> Self::Future {
        (**self).call(request)
    }
}

impl<S: Service + ?Sized + 'static> Service for Arc<S> {
    type Request = S::Request;
    type Response = S::Response;
    type Exception = S::Exception;
    type Future = S::Future;

    fn call(&self, request: S::Request) -> Self::Future {
        (**self).call(request)
    }
}
