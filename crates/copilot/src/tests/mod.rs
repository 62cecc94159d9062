mod session_flow;
mod support;
mod transports;
