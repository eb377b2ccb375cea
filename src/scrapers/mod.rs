//! Site-specific scraping.
//!
//! Each scraper module knows the URLs and selectors of one site and drives a
//! [`crate::browser::Session`] through them:
//!
//! | Site | Module | Notes |
//! |------|--------|-------|
//! | Naver Cafe | [`cafe`] | Content lives in the `cafe_main` iframe |
//!
//! Scrapers only read pages and write files. Paging and stop decisions are
//! made by [`crate::controller`].

pub mod cafe;
