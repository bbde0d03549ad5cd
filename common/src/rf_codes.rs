use crate::types::SocketId;

// 433MHz codes for the five-socket remote set, indexed by socket id - 1.
pub const RF_CODE_ON: [u32; 5] = [4_308_444, 4_308_442, 4_308_441, 4_308_445, 4_308_443];
pub const RF_CODE_OFF: [u32; 5] = [4_308_436, 4_308_434, 4_308_433, 4_308_437, 4_308_435];

pub fn rf_code(socket: SocketId, on: bool) -> u32 {
    if on {
        RF_CODE_ON[socket.index()]
    } else {
        RF_CODE_OFF[socket.index()]
    }
}
