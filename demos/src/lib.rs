#![deny(warnings, clippy::all, clippy::pedantic)]

mod dictionary;
