pub mod http_attendance_client;
