//! Message rendering and outbound delivery

pub mod adapter;
pub mod links;
pub mod template;
pub mod transport;

pub use adapter::DeliveryAdapter;
pub use template::TemplateRenderer;
pub use transport::{
    MailTransport, OutboundMessage, RelaySettings, SendReceipt, SmtpTransport, TransportError,
};
