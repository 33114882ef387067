pub mod show;
pub mod seat;
pub mod booking;

pub use show::{SeatMap, Show, ShowStatus};
pub use seat::{Seat, SeatCategory, SeatLock, SeatStatus, ShowSeatState};
pub use booking::{Booking, BookingState, BookingStatus, LockHandle};

pub type ShowId = i64;
pub type SeatId = i64;
