// Field detection: host tree abstraction, scanner, and change observer.

pub mod dom;
pub mod observer;
pub mod scanner;
