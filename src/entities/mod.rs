pub mod customer;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod pending_checkout;
pub mod product_variant;
pub mod webhook_event;

pub use customer::Entity as Customer;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use payment::Entity as Payment;
pub use pending_checkout::Entity as PendingCheckout;
pub use product_variant::Entity as ProductVariant;
pub use webhook_event::Entity as WebhookEvent;
