// src/core/handler/registry.rs
//
// A flat tag -> handler map, deliberately not a trait hierarchy: a
// dispatch table is all this needs, built once at startup from the
// built-in handlers and whichever collaborators are configured.

use std::collections::HashMap;

use crate::core::connector::Connector;
use crate::core::context::TsiContext;
use crate::core::errors::TsiError;

pub type HandlerFn = Box<dyn Fn(&str, &mut dyn Connector, &TsiContext) -> Result<(), TsiError> + Send + Sync>;

pub struct HandlerRegistry {
    handlers: HashMap<&'static str, HandlerFn>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    pub fn get(&self, tag: &str) -> Option<&HandlerFn> {
        self.handlers.get(tag)
    }
}

pub struct HandlerRegistryBuilder {
    handlers: HashMap<&'static str, HandlerFn>,
}

impl HandlerRegistryBuilder {
    pub fn register(mut self, tag: &'static str, handler: HandlerFn) -> Self {
        self.handlers.insert(tag, handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry { handlers: self.handlers }
    }
}
