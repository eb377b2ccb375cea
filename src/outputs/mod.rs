//! Output writers for scraped articles.
//!
//! # Output Structure
//!
//! ```text
//! downloads/
//! └── <forum id>/
//!     └── <post title>/
//!         ├── content.txt
//!         ├── image_1.jpg
//!         └── image_2.jpg
//! ```
//!
//! Every path segment goes through [`crate::utils::sanitize_filename`].

pub mod files;
