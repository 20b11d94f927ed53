use std::{sync::Arc, time::Duration};

use gpu_submit::{
    graphics::hal::sim::SimConfig, CommandQueueCreateInfo, CommandQueueDesc, Device, SyncPoint,
};
use rayon::prelude::*;
use tracing::{info, Level};

const BACK_BUFFER_COUNT: usize = 2;
const FRAME_COUNT: usize = 8;
const UPLOAD_BATCH: usize = 4;

fn main() -> gpu_submit::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let info = match std::env::args().nth(1) {
        Some(path) => CommandQueueCreateInfo::from_file(path)?,
        None => CommandQueueCreateInfo::default().with_command_list_count(3),
    };

    let device = Device::simulated(SimConfig::threaded(Duration::from_millis(2)));
    let copy_queue = device.create_command_queue(
        &CommandQueueCreateInfo::new(CommandQueueDesc::copy()).with_command_list_count(UPLOAD_BATCH),
    )?;
    let direct_queue = device.create_command_queue(&info)?;

    let meshes = (0..UPLOAD_BATCH)
        .map(|i| Arc::new(vec![i as f32; 1024]))
        .collect::<Vec<_>>();

    let uploads = (0..UPLOAD_BATCH)
        .map(|_| copy_queue.begin_command_list())
        .collect::<gpu_submit::Result<Vec<_>>>()?;

    uploads.par_iter().zip(&meshes).for_each(|(list, mesh)| {
        list.add_dependency(Arc::clone(mesh));
        list.record(|raw| raw.copy_buffer((mesh.len() * std::mem::size_of::<f32>()) as u64));
    });

    let uploaded = copy_queue.execute_command_lists(&uploads.iter().collect::<Vec<_>>())?;
    info!(fence_value = uploaded.value(), "mesh upload submitted");

    direct_queue.wait_on_gpu(&uploaded)?;

    let mut back_buffers: [Option<SyncPoint<_>>; BACK_BUFFER_COUNT] = Default::default();

    for frame in 0..FRAME_COUNT {
        let back_buffer = frame % BACK_BUFFER_COUNT;
        if let Some(last_use) = back_buffers[back_buffer].take() {
            last_use.wait()?;
        }

        let list = direct_queue.begin_command_list()?;
        list.set_name(format!("Present Cmd {back_buffer}"))?;
        list.record(|raw| {
            raw.marker(format!("frame {frame}"));
            for mesh in &meshes {
                raw.draw(mesh.len() as u32, 1);
            }
        });
        for mesh in &meshes {
            list.add_dependency(Arc::clone(mesh));
        }

        let sync_point = direct_queue.execute_command_list(&list)?;
        info!(frame, fence_value = sync_point.value(), "frame submitted");
        back_buffers[back_buffer] = Some(sync_point);
    }

    // Nothing may still be reading the meshes once they are dropped.
    direct_queue.flush()?;
    copy_queue.flush()?;

    info!(
        executed = direct_queue.raw().executed().len(),
        mesh_refs = Arc::strong_count(&meshes[0]),
        "done"
    );

    Ok(())
}
