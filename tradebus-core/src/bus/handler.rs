//! Handler trait and the owning / non-owning references the bus stores.

use super::EventBus;
use crate::error::HandlerError;
use crate::event::Event;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Anything that can receive events from the bus.
///
/// Handlers get the bus back so they can publish follow-up events (or change
/// subscriptions) from inside a dispatch. Changes to subscriptions take effect
/// on the next `publish`.
pub trait EventHandler {
    fn handle(&mut self, event: &mut Event, bus: &mut EventBus) -> Result<(), HandlerError>;

    /// Label used in logs and errors.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Shared, interior-mutable handler as stored behind a subscription.
pub type SharedHandler = Rc<RefCell<dyn EventHandler>>;

/// Closure adapter for [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> EventHandler for FnHandler<F>
where
    F: FnMut(&mut Event, &mut EventBus) -> Result<(), HandlerError>,
{
    fn handle(&mut self, event: &mut Event, bus: &mut EventBus) -> Result<(), HandlerError> {
        (self.f)(event, bus)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// How a subscription refers to its handler.
///
/// `Owned` keeps the handler alive for as long as it is subscribed.
/// `Component` holds a [`Weak`] reference: once the owning component is
/// dropped the subscription is skipped and pruned instead of keeping the
/// component alive.
#[derive(Clone)]
pub enum HandlerRef {
    Owned(SharedHandler),
    Component(Weak<RefCell<dyn EventHandler>>),
}

impl HandlerRef {
    /// Bus-owned handler.
    pub fn owned<H: EventHandler + 'static>(handler: H) -> Self {
        HandlerRef::Owned(Rc::new(RefCell::new(handler)))
    }

    /// Bus-owned closure handler.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&mut Event, &mut EventBus) -> Result<(), HandlerError> + 'static,
    {
        Self::owned(FnHandler { name: name.into(), f })
    }

    /// Non-owning reference to a component that lives elsewhere.
    pub fn component<H: EventHandler + 'static>(component: &Rc<RefCell<H>>) -> Self {
        let shared: SharedHandler = component.clone();
        HandlerRef::Component(Rc::downgrade(&shared))
    }

    /// Upgrade to a strong reference for the duration of one dispatch.
    pub fn resolve(&self) -> Option<SharedHandler> {
        match self {
            HandlerRef::Owned(handler) => Some(Rc::clone(handler)),
            HandlerRef::Component(weak) => weak.upgrade(),
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            HandlerRef::Owned(_) => true,
            HandlerRef::Component(weak) => weak.strong_count() > 0,
        }
    }

    /// Whether both references point at the same handler allocation.
    ///
    /// Works for dead component references too; the bus keeps the weak
    /// reference, so the address cannot be reused while it is subscribed.
    pub fn same_handler(&self, other: &HandlerRef) -> bool {
        std::ptr::eq(self.addr(), other.addr())
    }

    fn addr(&self) -> *const () {
        match self {
            HandlerRef::Owned(handler) => Rc::as_ptr(handler) as *const (),
            HandlerRef::Component(weak) => weak.as_ptr() as *const (),
        }
    }

    /// Handler label for logs; falls back to a placeholder when the handler
    /// is gone or currently mid-dispatch.
    pub fn describe(&self) -> String {
        match self.resolve() {
            Some(handler) => match handler.try_borrow() {
                Ok(h) => h.name().to_string(),
                Err(_) => "<busy>".to_string(),
            },
            None => "<dropped>".to_string(),
        }
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            HandlerRef::Owned(_) => "Owned",
            HandlerRef::Component(_) => "Component",
        };
        f.debug_struct("HandlerRef")
            .field("kind", &kind)
            .field("addr", &self.addr())
            .field("alive", &self.is_alive())
            .finish()
    }
}
