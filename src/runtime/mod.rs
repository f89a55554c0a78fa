//! Reactive runtime that compiled components drive.
//!
//! Everything here is single-threaded: detectors, the DOM arena and the
//! scheduler share state through `Rc`/`RefCell`.

pub mod bind;
pub mod blocks;
pub mod component;
pub mod detector;
pub mod dom;
pub mod scheduler;
pub mod template;
pub mod value;

pub use blocks::{await_block, each_block, html_block, if_block, Anchor, AwaitParts, Branch, EachSpec};
pub use component::{Component, ComponentOptions, Constructor, EventMap};
pub use detector::{digest, digest_report, ChangeDetector, Comparator, DigestReport, WatchOptions};
pub use dom::{DomRef, Document, NodeId};
pub use scheduler::{ApplyScheduler, EventLoop};
pub use template::{html_to_fragment, svg_to_fragment};
pub use value::{Promise, Value};
