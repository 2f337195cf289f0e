//! Face capture and attendance submission pipeline.
//!
//! Frames flow `sampling → detection → capture → submission`, driven by the
//! event loop in [`pipeline::capture_flow`]. Each bounded context keeps its
//! ports under `domain` and its adapters (ffmpeg, ort, image, reqwest) under
//! `infrastructure`.

pub mod shared {
    pub mod config;
    pub mod constants;
    pub mod frame;
    pub mod region;
}

pub mod sampling {
    pub mod domain {
        pub mod frame_sampler;
        pub mod video_source;
    }
    pub mod infrastructure;
}

pub mod detection {
    pub mod domain {
        pub mod detection_adapter;
        pub mod face_detector;
    }
    pub mod infrastructure;
}

pub mod encoding {
    pub mod domain {
        pub mod image_encoder;
    }
    pub mod infrastructure;
}

pub mod capture {
    pub mod domain {
        pub mod capture_error;
        pub mod capture_state_machine;
        pub mod face_crop;
    }
}

pub mod submission {
    pub mod domain {
        pub mod attendance_service;
        pub mod receipts;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod capture_flow;
    pub mod capture_observer;
    pub mod submission_dispatcher;
    pub mod infrastructure;
}
