// Crate entry point. Re-export modules so tests and binaries can import them easily.
//
// Responsibilities
// - Only declare and expose modules. No business logic here.
//
// How it is used
// - The binary in shell/main.rs and the integration tests import from this crate root.

pub mod core {
    pub mod outbox_entry;
    pub mod ports;
    pub mod received_message;
    pub mod retry_policy;
}

pub mod application {
    pub mod errors;
    pub mod command_handlers {
        pub mod enqueue_handler;
    }
    pub mod relay {
        pub mod runner;
    }
    pub mod consumer {
        pub mod consumption_loop;
    }
}

pub mod adapters {
    pub mod in_memory {
        pub mod in_memory_broker;
        pub mod in_memory_outbox_store;
    }
    pub mod processors {
        pub mod logging_processor;
    }
}

pub mod shell;
