//! Entry point for the `tests/unit/` module tree.

mod unit;
