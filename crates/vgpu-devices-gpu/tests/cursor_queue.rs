mod common;

use common::*;
use pretty_assertions::assert_eq;
use vgpu_devices_gpu::CURSOR_QUEUE;
use virtio_gpu_proto::protocol::*;

fn cursor_events(dev: &TestDevice) -> Vec<DisplayEvent> {
    dev.display
        .events()
        .into_iter()
        .filter(|e| matches!(e, DisplayEvent::CursorDefine { .. } | DisplayEvent::CursorMove(..)))
        .collect()
}

#[test]
fn update_defines_and_move_positions_the_cursor() {
    let dev = new_device(Blob::Disabled);
    dev.control(req::create_2d(20, VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM, 64, 64));

    dev.cursor(req::cursor(VIRTIO_GPU_CMD_UPDATE_CURSOR, 20, 100, 200, 3, 4));
    dev.cursor(req::cursor(VIRTIO_GPU_CMD_MOVE_CURSOR, 0, 110, 210, 0, 0));

    assert_eq!(
        cursor_events(&dev),
        vec![
            DisplayEvent::CursorDefine {
                x: 100,
                y: 200,
                hot_x: 3,
                hot_y: 4,
                width: 64,
                height: 64,
                pixels: vec![0; 64 * 64 * 4],
            },
            DisplayEvent::CursorMove(110, 210),
        ]
    );
}

#[test]
fn updates_without_a_usable_resource_are_ignored() {
    let dev = new_device(Blob::Disabled);
    dev.cursor(req::cursor(VIRTIO_GPU_CMD_UPDATE_CURSOR, 0, 1, 1, 0, 0));
    dev.cursor(req::cursor(VIRTIO_GPU_CMD_UPDATE_CURSOR, 77, 1, 1, 0, 0));
    dev.cursor(hdr(VIRTIO_GPU_CMD_MOVE_CURSOR));
    dev.cursor(hdr(VIRTIO_GPU_CMD_GET_DISPLAY_INFO));
    assert_eq!(cursor_events(&dev), vec![]);
}

#[test]
fn every_cursor_chain_is_returned_empty() {
    let dev = new_device(Blob::Disabled);
    let before = dev.cursor.notifications();
    let heads: Vec<u16> = (0..3)
        .map(|i| dev.cursor.push(req::cursor(VIRTIO_GPU_CMD_MOVE_CURSOR, 0, i, i, 0, 0), 0))
        .collect();
    dev.gpu.notify_queue(CURSOR_QUEUE);
    dev.gpu.sync().unwrap();

    let used = dev.cursor.used();
    assert_eq!(used.iter().map(|(h, _)| *h).collect::<Vec<_>>(), heads);
    assert!(used.iter().all(|(_, resp)| resp.is_empty()));
    assert_eq!(dev.cursor.notifications(), before + 1);
    assert_eq!(
        cursor_events(&dev),
        vec![
            DisplayEvent::CursorMove(0, 0),
            DisplayEvent::CursorMove(1, 1),
            DisplayEvent::CursorMove(2, 2),
        ]
    );
}

#[test]
fn small_blob_cursor_images() {
    let dev = new_device(Blob::Enabled);
    dev.write_guest(0x4000, &[0x80; 64 * 64 * 4]);
    dev.control(req::guest_blob(30, 64 * 64 * 4, &[(0x4000, 64 * 64 * 4)]));
    dev.cursor(req::cursor(VIRTIO_GPU_CMD_UPDATE_CURSOR, 30, 5, 6, 1, 1));
    assert_eq!(
        cursor_events(&dev),
        vec![DisplayEvent::CursorDefine {
            x: 5,
            y: 6,
            hot_x: 1,
            hot_y: 1,
            width: 64,
            height: 64,
            pixels: vec![0x80; 64 * 64 * 4],
        }]
    );
}

#[test]
fn small_blob_cursor_picks_up_transferred_bytes() {
    let dev = new_device(Blob::Enabled);
    let size = 64 * 64 * 4;
    dev.control(req::guest_blob(8, size as u64, &[(0x4000, size as u32)]));

    // The guest draws the cursor after creating the blob.
    let image: Vec<u8> = (0..size).map(|i| (i % 251) as u8 + 1).collect();
    dev.write_guest(0x4000, &image);
    assert_eq!(
        resp_type(&dev.control(req::transfer_to_host_2d(8, (0, 0, 64, 64), 0))),
        VIRTIO_GPU_RESP_OK_NODATA
    );
    dev.cursor(req::cursor(VIRTIO_GPU_CMD_UPDATE_CURSOR, 8, 0, 0, 0, 0));

    match cursor_events(&dev).as_slice() {
        [DisplayEvent::CursorDefine { pixels, .. }] => assert_eq!(pixels, &image),
        other => panic!("unexpected cursor events: {other:?}"),
    }

    // The same image reaches a scanout flush.
    dev.control(req::set_scanout(0, 8, (0, 0, 64, 64)));
    dev.control(req::flush(8, (0, 0, 64, 64)));
    assert_eq!(dev.display.last_surface_update().unwrap().pixels.unwrap(), image);
}
