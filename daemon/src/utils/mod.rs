pub use history::*;

mod history;
