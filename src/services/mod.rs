// Core services
pub mod orders;

// Checkout and everything it reads
pub mod commerce;

// Payment gateway and post-commit mail
pub mod notifications;
pub mod payments;
