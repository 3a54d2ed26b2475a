mod middleware;

pub use middleware::AdmissionMiddleware;
