#![allow(dead_code)]

use wasm_bindgen::prelude::*;

mod adaptive;
mod bindings;
mod decrypter;
pub mod dispatcher;
mod media_element;
mod playlist;
mod requester;
mod segment_loader;
mod transmux;
mod utils;

pub use utils::logger::Logger;
